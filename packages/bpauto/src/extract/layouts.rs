//! Known register extract layouts.

use std::sync::LazyLock;

use regex::Regex;

use super::text::split_german_address;
use super::Layout;
use crate::types::ExtractedFields;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static FIRMA_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b2\.\s*a\)\s*Firma:[ \t]*(.+)").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static BUSINESS_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Gesch(?:ä|ae)ftsanschrift:[ \t]*(.+)").expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static ASSOCIATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Name\s+des\s+Vereins").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static CURRENT_PRINTOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*Aktueller\s+Ausdruck\s+(.+)$").expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SECTION_A: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^2\.\s*a\)").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SECTION_B: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:2\.\s*)?b\)").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SECTION_3: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^3\.").expect("valid regex"));

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn letters_upper(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphabetic())
        .collect::<String>()
        .to_uppercase()
}

/// Commercial register extract (HRA, HRB, GnR, PR).
///
/// ```text
/// Handelsregister B des Amtsgerichts München
/// Abteilung B Wiedergabe des aktuellen Registerinhalts HRB 12345
/// ...
/// 2.a) Firma: ACME GmbH
/// b) Sitz, Niederlassung, ...
/// München
/// Geschäftsanschrift: Hauptstr. 1, 80331 München
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CommercialRegisterLayout;

impl Layout for CommercialRegisterLayout {
    fn name(&self) -> &'static str {
        "commercial register"
    }

    fn matches(&self, text: &str) -> bool {
        FIRMA_LINE.is_match(text)
    }

    fn extract(&self, text: &str) -> Option<ExtractedFields> {
        // Register type and number are the last two words of the second line
        let register_line = text.lines().map(str::trim).filter(|l| !l.is_empty()).nth(1)?;
        let words: Vec<&str> = register_line.split_whitespace().collect();
        let [.., type_word, number_word] = words.as_slice() else {
            return None;
        };
        let register_type = non_empty(letters_upper(type_word))?;
        let register_number =
            non_empty(number_word.chars().filter(char::is_ascii_digit).collect())?;

        let name = FIRMA_LINE.captures(text)?.get(1)?.as_str();
        let address = BUSINESS_ADDRESS.captures(text)?.get(1)?.as_str();
        let parts = split_german_address(address.trim());

        Some(ExtractedFields {
            legal_name: non_empty(name.to_string()),
            register_type: Some(register_type),
            register_number: Some(register_number),
            street: non_empty(parts.street),
            house_number: non_empty(parts.house_number),
            postal_code: non_empty(parts.postal_code),
            city: non_empty(parts.city),
        })
    }
}

/// Association register extract (VR).
///
/// ```text
/// Ausdruck - Vereinsregister - VR 601 SE
/// Aktueller Ausdruck VR 601 SE
/// ...
/// 2.a) Name des Vereins
/// Sportfreunde Musterstadt e.V.
/// b) Sitz des Vereins
/// Musterstadt
/// Am Sportplatz 1, 12345 Musterstadt
/// 3. ...
/// ```
///
/// Associations often have no street address; section `b)` then only names
/// the city.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssociationRegisterLayout;

impl Layout for AssociationRegisterLayout {
    fn name(&self) -> &'static str {
        "association register"
    }

    fn matches(&self, text: &str) -> bool {
        ASSOCIATION_MARKER.is_match(text)
    }

    fn extract(&self, text: &str) -> Option<ExtractedFields> {
        let register = CURRENT_PRINTOUT.captures(text)?.get(1)?.as_str();
        let mut words = register.split_whitespace();
        let register_type = non_empty(letters_upper(words.next()?))?;
        let register_number = non_empty(words.collect::<Vec<_>>().join(" "))?;

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let idx_a = lines.iter().position(|l| SECTION_A.is_match(l))?;
        let idx_b = idx_a + lines[idx_a..].iter().position(|l| SECTION_B.is_match(l))?;

        let mut name_parts: Vec<&str> = Vec::new();
        if let Some(m) = ASSOCIATION_MARKER.find(lines[idx_a]) {
            name_parts.push(lines[idx_a][m.end()..].trim());
        }
        name_parts.extend(&lines[idx_a + 1..idx_b]);
        let legal_name = non_empty(
            name_parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        );

        let seat = lines.get(idx_b + 1).filter(|l| !SECTION_3.is_match(l));
        let address = seat
            .and_then(|_| lines.get(idx_b + 2))
            .filter(|l| !SECTION_3.is_match(l));

        let mut fields = ExtractedFields {
            legal_name,
            register_type: Some(register_type),
            register_number: Some(register_number),
            ..ExtractedFields::default()
        };

        match (seat, address) {
            (_, Some(address)) => {
                let parts = split_german_address(address.trim());
                fields.street = non_empty(parts.street);
                fields.house_number = non_empty(parts.house_number);
                fields.postal_code = non_empty(parts.postal_code);
                fields.city = non_empty(parts.city);
            }
            (Some(city), None) => {
                fields.city = non_empty(city.to_string());
            }
            (None, None) => {}
        }

        Some(fields)
    }
}
