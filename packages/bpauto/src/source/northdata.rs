//! NorthData REST API source.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;

use super::{RawContent, Source, SourceFailure};
use crate::config::NorthDataConfig;
use crate::error::Result;
use crate::http::{create_client, read_text, send};
use crate::types::{Candidate, SearchCriteria};

/// Keys under which the API may return a result list.
const RESULT_KEYS: [&str; 4] = ["result", "results", "hits", "data"];

/// Source backed by the NorthData company API.
///
/// NOTE: Do NOT derive `Debug` on this struct, the config holds the API key.
pub struct NorthDataSource {
    http: Client,
    config: NorthDataConfig,
    last_results: Vec<Value>,
}

impl NorthDataSource {
    pub fn new(config: NorthDataConfig) -> Result<Self> {
        let http = create_client(config.timeout, config.connect_timeout, false)?;
        Ok(Self {
            http,
            config,
            last_results: Vec::new(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/_api/company/v1/company", self.config.base_url)
    }
}

impl Source for NorthDataSource {
    fn name(&self) -> &'static str {
        "NorthData"
    }

    fn search(&mut self, criteria: &SearchCriteria) -> std::result::Result<Vec<Candidate>, SourceFailure> {
        self.last_results.clear();

        let mut params: Vec<(&str, String)> = vec![("name", criteria.keywords().to_string())];
        let address = [&criteria.postal_code, &criteria.city, &criteria.country]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if !address.is_empty() {
            params.push(("address", address));
        }

        tracing::debug!(?params, "Querying NorthData API");

        let request = self
            .http
            .get(self.endpoint())
            .query(&params)
            .header("X-Api-Key", &self.config.api_key);
        let response = send(request)?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!("NorthData API reports no results (404)");
            return Ok(Vec::new());
        }

        let body = read_text(response)?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| SourceFailure::Transient(format!("invalid JSON response: {e}")))?;

        let entries = narrow_entries(
            result_entries(&payload),
            criteria.keywords(),
            criteria.postal_code.as_deref(),
            criteria.city.as_deref(),
        );

        let candidates = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let mut candidate = Candidate::new(
                    entry_name(entry).unwrap_or_default(),
                    idx.to_string(),
                );
                candidate.address = entry_address_line(entry);
                candidate.registered_office = entry_city(entry);
                candidate
            })
            .collect();

        self.last_results = entries;
        Ok(candidates)
    }

    fn fetch_document(&mut self, candidate: &Candidate) -> std::result::Result<RawContent, SourceFailure> {
        candidate
            .handle
            .parse::<usize>()
            .ok()
            .and_then(|idx| self.last_results.get(idx))
            .cloned()
            .map(RawContent::Record)
            .ok_or_else(|| {
                SourceFailure::Terminal(format!(
                    "candidate '{}' is not part of the last result set",
                    candidate.name
                ))
            })
    }
}

/// Pull the result list out of an API payload.
///
/// A bare object without any list key is a single result.
fn result_entries(payload: &Value) -> Vec<Value> {
    let Some(object) = payload.as_object() else {
        tracing::debug!("JSON response has unexpected shape");
        return Vec::new();
    };

    for key in RESULT_KEYS {
        if let Some(Value::Array(items)) = object.get(key) {
            return items.iter().filter(|v| v.is_object()).cloned().collect();
        }
    }

    if object.is_empty() {
        Vec::new()
    } else {
        vec![payload.clone()]
    }
}

/// Narrow entries by city, then postal code, then exact name.
///
/// Each step only applies when it keeps at least one entry; none of them
/// picks a single winner among genuinely ambiguous entries.
fn narrow_entries(
    entries: Vec<Value>,
    name: &str,
    postal_code: Option<&str>,
    city: Option<&str>,
) -> Vec<Value> {
    let mut pool = entries;

    if let Some(city) = city.map(casefold) {
        keep_if_any(&mut pool, |e| entry_city(e).map(|c| casefold(&c)) == Some(city.clone()));
    }
    if let Some(zip) = postal_code.map(str::trim) {
        keep_if_any(&mut pool, |e| entry_postal_code(e).as_deref().map(str::trim) == Some(zip));
    }
    let wanted = casefold(name);
    keep_if_any(&mut pool, |e| entry_name(e).map(|n| casefold(&n)) == Some(wanted.clone()));

    pool
}

fn keep_if_any(pool: &mut Vec<Value>, predicate: impl Fn(&Value) -> bool) {
    if pool.iter().any(&predicate) {
        pool.retain(|e| predicate(e));
    }
}

fn casefold(value: &str) -> String {
    value.trim().to_lowercase()
}

fn string_at(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Company name of an entry; the name may be a nested object.
pub(crate) fn entry_name(entry: &Value) -> Option<String> {
    let raw = ["legalName", "legal_name", "name"]
        .iter()
        .find_map(|k| entry.get(*k).filter(|v| !v.is_null()))?;
    match raw {
        Value::Object(_) => string_at(raw, &["name", "legalName"]),
        other => string_at(&serde_json::json!({ "v": other }), &["v"]),
    }
}

fn address_block(entry: &Value) -> Option<&Value> {
    entry.get("address").filter(|v| v.is_object())
}

pub(crate) fn entry_postal_code(entry: &Value) -> Option<String> {
    string_at(entry, &["postalCode", "zip"])
        .or_else(|| address_block(entry).and_then(|a| string_at(a, &["postalCode", "zip"])))
}

pub(crate) fn entry_city(entry: &Value) -> Option<String> {
    string_at(entry, &["city"]).or_else(|| address_block(entry).and_then(|a| string_at(a, &["city"])))
}

pub(crate) fn entry_street(entry: &Value) -> Option<String> {
    match address_block(entry) {
        Some(a) => string_at(a, &["street", "streetName"]),
        None => string_at(entry, &["street"]),
    }
}

fn entry_address_line(entry: &Value) -> Option<String> {
    let parts: Vec<String> = [entry_street(entry), entry_postal_code(entry), entry_city(entry)]
        .into_iter()
        .flatten()
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_entries_from_list_keys() {
        let payload = json!({"results": [{"name": "A"}, {"name": "B"}, "noise"]});
        assert_eq!(result_entries(&payload).len(), 2);

        let payload = json!({"hits": []});
        assert!(result_entries(&payload).is_empty());
    }

    #[test]
    fn test_result_entries_single_object() {
        let payload = json!({"name": {"name": "ACME GmbH"}});
        let entries = result_entries(&payload);
        assert_eq!(entries.len(), 1);
        assert_eq!(entry_name(&entries[0]).as_deref(), Some("ACME GmbH"));

        assert!(result_entries(&json!({})).is_empty());
        assert!(result_entries(&json!([1, 2])).is_empty());
    }

    #[test]
    fn test_entry_accessors_read_nested_address() {
        let entry = json!({
            "name": "ACME GmbH",
            "address": {"street": "Hauptstr. 1", "postalCode": "80331", "city": "München"}
        });
        assert_eq!(entry_postal_code(&entry).as_deref(), Some("80331"));
        assert_eq!(entry_city(&entry).as_deref(), Some("München"));
        assert_eq!(
            entry_address_line(&entry).as_deref(),
            Some("Hauptstr. 1 80331 München")
        );
    }

    #[test]
    fn test_narrow_by_postal_code() {
        let entries = vec![
            json!({"name": "ACME GmbH", "postalCode": "80331"}),
            json!({"name": "ACME GmbH", "postalCode": "10115"}),
        ];
        let narrowed = narrow_entries(entries, "acme gmbh", Some("10115"), None);
        assert_eq!(narrowed.len(), 1);
        assert_eq!(entry_postal_code(&narrowed[0]).as_deref(), Some("10115"));
    }

    #[test]
    fn test_narrow_keeps_all_when_nothing_matches() {
        let entries = vec![
            json!({"name": "ACME Holding", "city": "Berlin"}),
            json!({"name": "ACME Services", "city": "Hamburg"}),
        ];
        let narrowed = narrow_entries(entries, "ACME", Some("80331"), Some("Köln"));
        assert_eq!(narrowed.len(), 2);
    }

    #[test]
    fn test_narrow_by_exact_name() {
        let entries = vec![
            json!({"name": "ACME GmbH"}),
            json!({"name": "ACME GmbH & Co. KG"}),
        ];
        let narrowed = narrow_entries(entries, "Acme GmbH", None, None);
        assert_eq!(narrowed.len(), 1);
    }
}
