//! NorthData source against a mock API.
//!
//! The source uses a blocking HTTP client, so every call runs on tokio's
//! blocking pool while wiremock serves requests on the async runtime.

use bpauto::config::NorthDataConfig;
use bpauto::error::BpError;
use bpauto::resolve::{Resolver, RetryPolicy};
use bpauto::source::NorthDataSource;
use bpauto::types::{ResolutionOutcome, SearchCriteria};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/_api/company/v1/company";

/// Resolve `criteria` against the mock server on a blocking thread.
async fn resolve(server: &MockServer, criteria: SearchCriteria) -> bpauto::Result<ResolutionOutcome> {
    let base_url = server.uri();
    tokio::task::spawn_blocking(move || {
        let config = NorthDataConfig::new("test-key").with_base_url(base_url);
        let mut source = NorthDataSource::new(config)?;
        let outcome = Resolver::new(&mut source)
            .with_policy(RetryPolicy::without_delay())
            .resolve(&criteria);
        outcome
    })
    .await
    .unwrap()
}

fn acme_record(city: &str, zip: &str) -> serde_json::Value {
    json!({
        "name": {"name": "ACME GmbH"},
        "register": {"city": "München", "id": "HRB 12345"},
        "address": {"street": "Königstr. 7", "postalCode": zip, "city": city}
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_record_resolves_unique() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(header("X-Api-Key", "test-key"))
        .and(query_param("name", "ACME GmbH"))
        .and(query_param("address", "80331"))
        .respond_with(ResponseTemplate::new(200).set_body_json(acme_record("München", "80331")))
        .expect(1)
        .mount(&server)
        .await;

    let criteria = SearchCriteria::new("ACME GmbH")
        .unwrap()
        .with_postal_code("80331");
    let outcome = resolve(&server, criteria).await.unwrap();

    let ResolutionOutcome::Unique { fields, .. } = outcome else {
        panic!("expected a unique outcome, got {outcome:?}");
    };
    assert_eq!(fields.legal_name.as_deref(), Some("ACME GmbH"));
    assert_eq!(fields.register_type.as_deref(), Some("HRB"));
    assert_eq!(fields.register_number.as_deref(), Some("12345"));
    assert_eq!(fields.street.as_deref(), Some("Königstr."));
    assert_eq!(fields.house_number.as_deref(), Some("7"));
    assert_eq!(fields.city.as_deref(), Some("München"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_postal_code_narrows_result_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [acme_record("Berlin", "10115"), acme_record("München", "80331")]
        })))
        .mount(&server)
        .await;

    let criteria = SearchCriteria::new("ACME GmbH")
        .unwrap()
        .with_postal_code("80331");
    let outcome = resolve(&server, criteria).await.unwrap();

    let ResolutionOutcome::Unique { fields, .. } = outcome else {
        panic!("expected a unique outcome, got {outcome:?}");
    };
    assert_eq!(fields.postal_code.as_deref(), Some("80331"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_indistinguishable_results_stay_ambiguous() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                acme_record("München", "80331"),
                acme_record("München", "80331"),
                acme_record("München", "80331")
            ]
        })))
        .mount(&server)
        .await;

    let outcome = resolve(&server, SearchCriteria::new("ACME GmbH").unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, ResolutionOutcome::Ambiguous { count: 3 });
}

#[tokio::test(flavor = "multi_thread")]
async fn test_not_found_status_means_no_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = resolve(&server, SearchCriteria::new("ACME GmbH").unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, ResolutionOutcome::NotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rate_limit_is_retried_three_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let outcome = resolve(&server, SearchCriteria::new("ACME GmbH").unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, ResolutionOutcome::SourceError { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_key_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = resolve(&server, SearchCriteria::new("ACME GmbH").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BpError::Authentication { .. }));
    assert!(err.to_string().contains("NorthData"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_json_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(3)
        .mount(&server)
        .await;

    let outcome = resolve(&server, SearchCriteria::new("ACME GmbH").unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, ResolutionOutcome::SourceError { .. }));
}
