//! HTTP client helpers shared by the registry sources.
//!
//! Every request is a single attempt. Retrying is the resolver's job, so
//! these helpers only classify what went wrong.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;

use crate::config::USER_AGENT;
use crate::error::Result;
use crate::source::SourceFailure;

/// Create a configured HTTP client.
///
/// # Arguments
/// * `timeout` - Total timeout per request
/// * `connect_timeout` - Timeout for establishing the connection
/// * `cookies` - Keep a cookie store (needed for the register's UI session)
///
/// # Returns
/// A `reqwest::blocking::Client` with timeouts and user agent set.
pub fn create_client(timeout: Duration, connect_timeout: Duration, cookies: bool) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .user_agent(USER_AGENT)
        .cookie_store(cookies)
        .build()?;
    Ok(client)
}

/// Send a request and classify failures.
///
/// Non-success statuses are mapped through [`classify_status`]; a 404 is
/// returned to the caller as-is because some sources use it for "no result".
pub fn send(request: RequestBuilder) -> std::result::Result<Response, SourceFailure> {
    let response = request.send().map_err(|e| classify_transport(&e))?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        return Ok(response);
    }
    if let Some(failure) = classify_status(status) {
        tracing::warn!(status = %status, url = %response.url(), "Request failed");
        return Err(failure);
    }
    Ok(response)
}

/// Read a response body as text, classifying body errors as transient.
pub fn read_text(response: Response) -> std::result::Result<String, SourceFailure> {
    response.text().map_err(|e| classify_transport(&e))
}

/// Read a response body as bytes, classifying body errors as transient.
pub fn read_bytes(response: Response) -> std::result::Result<Vec<u8>, SourceFailure> {
    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| classify_transport(&e))
}

/// Classify an HTTP status code.
///
/// Returns `None` for non-error codes.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<SourceFailure> {
    let code = status.as_u16();
    match code {
        0..=399 => None,
        401 | 403 => Some(SourceFailure::Auth(format!("HTTP {code}"))),
        // Rate limiting and timeouts are retryable, like server errors (5xx)
        408 | 429 => Some(SourceFailure::Transient(format!("HTTP {code}"))),
        _ if status.is_server_error() => Some(SourceFailure::Transient(format!("HTTP {code}"))),
        // Other client errors (4xx) won't succeed on retry
        _ => Some(SourceFailure::Terminal(format!("HTTP {code}"))),
    }
}

/// Classify a transport-level error.
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> SourceFailure {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        SourceFailure::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status).unwrap_or_else(|| SourceFailure::Terminal(err.to_string()))
    } else {
        // Invalid URL, builder errors and the like - don't retry
        SourceFailure::Terminal(err.to_string())
    }
}
