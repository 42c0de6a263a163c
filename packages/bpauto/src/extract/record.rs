//! Field mapping for structured API records.

use serde_json::Value;

use super::text::split_german_address;
use crate::source::northdata::{entry_city, entry_name, entry_postal_code, entry_street};
use crate::types::ExtractedFields;

fn string_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_of(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| string_value(value.get(*k)))
}

/// Register type and number of a record.
///
/// The number is often prefixed with the type (`"HRB 12345"`); the prefix
/// is stripped. Without an explicit type, the first word of the number is
/// taken as the type.
fn register(record: &Value) -> (Option<String>, Option<String>) {
    let (register_type, number) = match record.get("register").filter(|v| v.is_object()) {
        Some(block) => {
            let number = first_of(block, &["number", "registerNumber", "id"]);
            let register_type = first_of(block, &["type", "registerType", "category"]).or_else(|| {
                number
                    .as_deref()
                    .and_then(|n| n.split_whitespace().next())
                    .map(str::to_string)
            });
            (register_type, number)
        }
        None => (
            first_of(record, &["registerType"]),
            first_of(record, &["registerNumber"]),
        ),
    };

    let number = match (&register_type, number) {
        (Some(kind), Some(number)) if number.to_uppercase().starts_with(&kind.to_uppercase()) => {
            let stripped = number.get(kind.len()..).unwrap_or_default().trim().to_string();
            Some(if stripped.is_empty() { number } else { stripped })
        }
        (_, number) => number,
    };

    (register_type.map(|t| t.to_uppercase()), number)
}

/// Map an API record onto the output fields.
///
/// Returns `None` when the record carries neither a name nor a register
/// entry, i.e. nothing that identifies a company.
pub(crate) fn fields_from_record(record: &Value) -> Option<ExtractedFields> {
    let legal_name = entry_name(record);
    let (register_type, register_number) = register(record);
    if legal_name.is_none() && register_number.is_none() {
        return None;
    }

    let street = entry_street(record).map(|s| split_german_address(&s));
    let non_empty = |s: String| (!s.is_empty()).then_some(s);

    Some(ExtractedFields {
        legal_name,
        register_type,
        register_number,
        street: street.as_ref().and_then(|p| non_empty(p.street.clone())),
        house_number: street.as_ref().and_then(|p| non_empty(p.house_number.clone())),
        postal_code: entry_postal_code(record),
        city: entry_city(record),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_prefix_is_stripped() {
        let record = json!({"register": {"type": "HRB", "id": "HRB 12345"}});
        assert_eq!(
            register(&record),
            (Some("HRB".to_string()), Some("12345".to_string()))
        );
    }

    #[test]
    fn test_register_type_from_number() {
        let record = json!({"register": {"id": "VR 601"}});
        assert_eq!(
            register(&record),
            (Some("VR".to_string()), Some("601".to_string()))
        );
    }

    #[test]
    fn test_register_flat_keys() {
        let record = json!({"registerType": "hra", "registerNumber": 4711});
        assert_eq!(
            register(&record),
            (Some("HRA".to_string()), Some("4711".to_string()))
        );
    }

    #[test]
    fn test_fields_from_record() {
        let record = json!({
            "name": {"name": "ACME GmbH"},
            "register": {"city": "München", "id": "HRB 12345"},
            "address": {"street": "Königstr. 7", "postalCode": "80331", "city": "München"}
        });
        let fields = fields_from_record(&record).unwrap();
        assert_eq!(fields.legal_name.as_deref(), Some("ACME GmbH"));
        assert_eq!(fields.register_type.as_deref(), Some("HRB"));
        assert_eq!(fields.register_number.as_deref(), Some("12345"));
        assert_eq!(fields.street.as_deref(), Some("Königstr."));
        assert_eq!(fields.house_number.as_deref(), Some("7"));
        assert_eq!(fields.postal_code.as_deref(), Some("80331"));
        assert_eq!(fields.city.as_deref(), Some("München"));
    }

    #[test]
    fn test_fields_from_empty_record() {
        assert_eq!(fields_from_record(&json!({"foo": 1})), None);
    }
}
