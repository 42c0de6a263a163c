//! Text helpers for register documents.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static LINE_END_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\n(\w)").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static BLANKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static POSTAL_CITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{4,5})\s+(.+)$").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static NUMBER_WITH_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s+[A-Za-z]$").expect("valid regex"));

/// Normalize document text before layout matching.
///
/// Applies NFKC, turns non-breaking spaces into spaces, unifies line
/// endings, joins words hyphenated across a line end and collapses runs of
/// blanks.
///
/// # Examples
/// ```
/// use bpauto::extract::normalize_text;
///
/// assert_eq!(normalize_text("Gesch\u{e4}fts-\r\nanschrift:\u{a0} X"), "Geschäftsanschrift: X");
/// ```
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let text: String = text.nfkc().collect();
    let text = text
        .replace('\u{00A0}', " ")
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    let text = LINE_END_HYPHEN.replace_all(&text, "$1");
    BLANKS.replace_all(&text, " ").into_owned()
}

/// Transliterate upper-cased text the way the partner sheet stores it.
///
/// # Examples
/// ```
/// use bpauto::extract::replace_umlauts;
///
/// assert_eq!(replace_umlauts("GROßE STR. 5"), "GROSSE STRASSE 5");
/// ```
#[must_use]
pub fn replace_umlauts(text: &str) -> String {
    text.replace("STR.", "STRASSE")
        .replace('Ö', "OE")
        .replace('Ä', "AE")
        .replace('Ü', "UE")
        .replace('ß', "SS")
}

/// Address split into its sheet columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressParts {
    pub street: String,
    pub house_number: String,
    pub postal_code: String,
    pub city: String,
}

/// Split `STREET 12A, 12345 CITY` into its parts.
///
/// The house number starts at the first digit left of the comma; the postal
/// code is a leading 5-digit (or 4-digit) number right of it. Parts that
/// cannot be found stay empty.
///
/// # Examples
/// ```
/// use bpauto::extract::split_german_address;
///
/// let parts = split_german_address("HAUPTSTRASSE 12 A, 80331 MUENCHEN");
/// assert_eq!(parts.street, "HAUPTSTRASSE");
/// assert_eq!(parts.house_number, "12A");
/// assert_eq!(parts.postal_code, "80331");
/// assert_eq!(parts.city, "MUENCHEN");
/// ```
#[must_use]
pub fn split_german_address(address: &str) -> AddressParts {
    let (left, right) = address.split_once(',').unwrap_or((address, ""));
    let (left, right) = (left.trim(), right.trim());

    let (street, mut house_number) = match left.find(|c: char| c.is_ascii_digit()) {
        Some(pos) => (left[..pos].trim().to_string(), left[pos..].trim().to_string()),
        None => (left.to_string(), String::new()),
    };
    if NUMBER_WITH_LETTER.is_match(&house_number) {
        house_number.retain(|c| c != ' ');
    }

    let (postal_code, city) = match POSTAL_CITY.captures(right) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()).to_string(),
            caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        ),
        None => (String::new(), right.to_string()),
    };

    AddressParts {
        street,
        house_number,
        postal_code,
        city,
    }
}

/// Spelling the partner sheet uses: upper case, transliterated.
///
/// # Examples
/// ```
/// use bpauto::extract::sheet_spelling;
///
/// assert_eq!(sheet_spelling(" Königstr. "), "KOENIGSTRASSE");
/// ```
#[must_use]
pub fn sheet_spelling(value: &str) -> String {
    replace_umlauts(&value.trim().to_uppercase())
}
