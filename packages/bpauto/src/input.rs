//! Search input from sheet rows.
//!
//! Partner names are often spread over up to three columns ("ACME Holding",
//! "GmbH & Co. KG", "z.Hd. Einkauf"), with placeholders like `N/A` or `k.A.`
//! in unused ones. This module cleans the parts and picks the name to search
//! for.

use unicode_normalization::UnicodeNormalization;

use crate::error::Result;
use crate::types::{RowState, SearchCriteria, SearchMode};

/// Placeholder values that mean "no name part here".
const NOISE_VALUES: &[&str] = &[
    "",
    "-",
    "--",
    "N.N",
    "N.N.",
    "NN",
    "N/A",
    "K.A",
    "K.A.",
    "KA",
    "O.A",
    "O.A.",
    "OA",
    "OHNE ANGABE",
    "KEINE ANGABE",
];

/// Legal-form tokens, upper-case ASCII with punctuation removed.
const SUFFIX_TOKENS: &[&str] = &[
    "AG",
    "AS",
    "AB",
    "BV",
    "BVBA",
    "EG",
    "EK",
    "EV",
    "GBR",
    "GDBR",
    "GMBH",
    "INC",
    "KG",
    "KGA",
    "KGAA",
    "LIMITED",
    "LLC",
    "LLP",
    "LP",
    "LTD",
    "NV",
    "OHG",
    "PARTG",
    "PARTGMBB",
    "PLC",
    "SAS",
    "SARL",
    "SA",
    "SCE",
    "SE",
    "SPA",
    "SRL",
    "STIFTUNG",
    "UG",
    "UGHAFTUNGSBESCHRANKT",
];

/// Multi-word legal forms.
const SUFFIX_PHRASES: &[&str] = &["CO KG", "CO KGAA"];

/// Clean one name part: collapse whitespace, drop placeholders.
///
/// # Examples
/// ```
/// use bpauto::input::clean_name_part;
///
/// assert_eq!(clean_name_part("  ACME   GmbH "), Some("ACME GmbH".to_string()));
/// assert_eq!(clean_name_part("k.A."), None);
/// assert_eq!(clean_name_part("  "), None);
/// ```
#[must_use]
pub fn clean_name_part(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if is_noise(&collapsed) {
        return None;
    }
    Some(collapsed)
}

fn is_noise(value: &str) -> bool {
    let upper = value.trim().to_uppercase();
    let alnum: String = upper.chars().filter(|c| c.is_alphanumeric()).collect();
    NOISE_VALUES.contains(&upper.as_str()) || NOISE_VALUES.contains(&alnum.as_str())
}

/// Upper-case, strip diacritics and everything that is not `A-Z0-9`.
fn suffix_token(word: &str) -> String {
    word.nfd()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Whether a name ends with a legal-form suffix.
///
/// Looks at the last one, two and three words, both spaced (`CO KG`) and
/// run together (`GMBH` from `G.m.b.H.`, `UGHAFTUNGSBESCHRANKT`).
///
/// # Examples
/// ```
/// use bpauto::input::has_legal_form;
///
/// assert!(has_legal_form("ACME GmbH"));
/// assert!(has_legal_form("Muster GmbH & Co. KG"));
/// assert!(has_legal_form("Beispiel UG (haftungsbeschränkt)"));
/// assert!(!has_legal_form("ACME Holding"));
/// ```
#[must_use]
pub fn has_legal_form(name: &str) -> bool {
    let tokens: Vec<String> = name
        .split_whitespace()
        .map(suffix_token)
        .filter(|t| !t.is_empty())
        .collect();

    let is_suffix = |s: &str| SUFFIX_TOKENS.contains(&s) || SUFFIX_PHRASES.contains(&s);

    (1..=tokens.len().min(3)).any(|n| {
        let tail = &tokens[tokens.len() - n..];
        is_suffix(&tail.join(" ")) || is_suffix(&tail.concat())
    })
}

/// Combine cleaned name parts into the name to search for.
///
/// A single part is used as is. Several parts are joined when the result
/// ends in a legal form; otherwise the longest part with a legal form wins,
/// and failing that the longest part. Returns `None` when every part is
/// empty or a placeholder.
///
/// # Examples
/// ```
/// use bpauto::input::combine_name_parts;
///
/// assert_eq!(
///     combine_name_parts(&["ACME Holding", "GmbH"]).as_deref(),
///     Some("ACME Holding GmbH")
/// );
/// assert_eq!(
///     combine_name_parts(&["ACME GmbH", "Einkauf"]).as_deref(),
///     Some("ACME GmbH")
/// );
/// assert_eq!(combine_name_parts(&["N/A", "-"]), None);
/// ```
#[must_use]
pub fn combine_name_parts<S: AsRef<str>>(parts: &[S]) -> Option<String> {
    let fragments: Vec<String> = parts
        .iter()
        .filter_map(|p| clean_name_part(p.as_ref()))
        .collect();

    match fragments.as_slice() {
        [] => None,
        [single] => Some(single.clone()),
        _ => {
            let combined = fragments.join(" ");
            if has_legal_form(&combined) {
                return Some(combined);
            }
            longest(fragments.iter().filter(|f| has_legal_form(f)))
                .or_else(|| longest(fragments.iter()))
        }
    }
}

/// Longest fragment; the first one wins a tie.
fn longest<'a>(fragments: impl Iterator<Item = &'a String>) -> Option<String> {
    fragments
        .fold(None::<&String>, |best, f| match best {
            Some(b) if b.len() >= f.len() => Some(b),
            _ => Some(f),
        })
        .cloned()
}

/// Build search criteria for a sheet row.
///
/// The name comes from [`combine_name_parts`], falling back to the raw
/// first name column when all parts look like placeholders. Register number
/// and postal code are taken from the row when present.
///
/// # Errors
/// `BpError::MissingKeywords` when the row has no name at all.
pub fn criteria_for_row(row: &RowState, mode: SearchMode) -> Result<SearchCriteria> {
    let parts = &row.identifiers.name_parts;
    let keywords = combine_name_parts(parts)
        .or_else(|| parts.first().map(|p| p.trim().to_string()))
        .unwrap_or_default();

    let mut criteria = SearchCriteria::new(keywords)?.with_mode(mode);
    if let Some(number) = &row.identifiers.register_number {
        criteria = criteria.with_register_number(number.as_str());
    }
    if let Some(postal_code) = &row.identifiers.postal_code {
        criteria = criteria.with_postal_code(postal_code.as_str());
    }
    if let Some(city) = &row.fields.city {
        criteria = criteria.with_city(city.as_str());
    }
    if let Some(country) = &row.identifiers.country {
        criteria = criteria.with_country(country.as_str());
    }
    Ok(criteria)
}
