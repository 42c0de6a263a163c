//! Core data types for resolution and reconciliation.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{BpError, Result};

/// How the register interprets the keywords of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// The company name contains all keywords.
    #[default]
    All,
    /// The company name contains at least one keyword.
    Any,
    /// The company name equals the keywords.
    Exact,
}

impl SearchMode {
    /// Option value used by the register's search form.
    #[must_use]
    pub fn form_value(&self) -> &'static str {
        match self {
            Self::All => "1",
            Self::Any => "2",
            Self::Exact => "3",
        }
    }

    /// Parse the CLI spelling (`all`, `min`, `exact`).
    #[must_use]
    pub fn from_cli(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "all" => Some(Self::All),
            "min" | "any" => Some(Self::Any),
            "exact" => Some(Self::Exact),
            _ => None,
        }
    }
}

/// Immutable input to one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    keywords: String,
    pub register_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub mode: SearchMode,
}

impl SearchCriteria {
    /// Create criteria for the given keywords.
    ///
    /// # Errors
    /// `BpError::MissingKeywords` if the keywords are blank.
    pub fn new(keywords: impl Into<String>) -> Result<Self> {
        let keywords = keywords.into().trim().to_string();
        if keywords.is_empty() {
            return Err(BpError::MissingKeywords);
        }
        Ok(Self {
            keywords,
            register_number: None,
            postal_code: None,
            city: None,
            country: None,
            mode: SearchMode::default(),
        })
    }

    /// Create criteria without validating the keywords.
    ///
    /// The resolver still refuses to search with blank keywords; this exists
    /// for callers that hand over raw sheet input.
    #[must_use]
    pub fn unchecked(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            register_number: None,
            postal_code: None,
            city: None,
            country: None,
            mode: SearchMode::default(),
        }
    }

    #[must_use]
    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    #[must_use]
    pub fn with_register_number(mut self, number: impl Into<String>) -> Self {
        self.register_number = non_blank(number.into());
        self
    }

    #[must_use]
    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = non_blank(postal_code.into());
        self
    }

    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = non_blank(city.into());
        self
    }

    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = non_blank(country.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// One entry in a source's result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Candidate {
    /// Company name as listed by the source.
    pub name: String,
    /// Source-specific handle used to fetch the document.
    pub handle: String,
    /// Row position in the UI result table (`None` for API results).
    pub position: Option<usize>,
    /// Register court, if listed.
    pub court: Option<String>,
    /// Registered office, if listed.
    pub registered_office: Option<String>,
    /// Address text, if listed.
    pub address: Option<String>,
}

impl Candidate {
    /// Create a candidate with a name and fetch handle.
    #[must_use]
    pub fn new(name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: handle.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn at_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Logical output fields of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    LegalName,
    RegisterType,
    RegisterNumber,
    Street,
    HouseNumber,
    PostalCode,
    City,
}

impl Field {
    /// All extracted fields, in write order.
    pub const ALL: [Field; 7] = [
        Field::LegalName,
        Field::RegisterType,
        Field::RegisterNumber,
        Field::Street,
        Field::HouseNumber,
        Field::PostalCode,
        Field::City,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegalName => "legal_name",
            Self::RegisterType => "register_type",
            Self::RegisterNumber => "register_number",
            Self::Street => "street",
            Self::HouseNumber => "house_number",
            Self::PostalCode => "postal_code",
            Self::City => "city",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields extracted from a register document.
///
/// `None` means unknown; `Some("")` means deliberately blank.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub legal_name: Option<String>,
    pub register_type: Option<String>,
    pub register_number: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

impl ExtractedFields {
    /// Get the value of a field.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::LegalName => self.legal_name.as_deref(),
            Field::RegisterType => self.register_type.as_deref(),
            Field::RegisterNumber => self.register_number.as_deref(),
            Field::Street => self.street.as_deref(),
            Field::HouseNumber => self.house_number.as_deref(),
            Field::PostalCode => self.postal_code.as_deref(),
            Field::City => self.city.as_deref(),
        }
    }

    /// Set the value of a field.
    pub fn set(&mut self, field: Field, value: Option<String>) {
        let slot = match field {
            Field::LegalName => &mut self.legal_name,
            Field::RegisterType => &mut self.register_type,
            Field::RegisterNumber => &mut self.register_number,
            Field::Street => &mut self.street,
            Field::HouseNumber => &mut self.house_number,
            Field::PostalCode => &mut self.postal_code,
            Field::City => &mut self.city,
        };
        *slot = value;
    }
}

/// Why a source failed after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Every attempt failed transiently.
    RetriesExhausted { attempts: u32, last_error: String },
    /// The source rejected the request outright.
    Terminal(String),
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "{attempts} attempts failed, last: {last_error}"),
            Self::Terminal(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// The single result of resolving one set of search criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Exactly one candidate, document extracted.
    Unique {
        candidate: Candidate,
        fields: ExtractedFields,
        document: Option<PathBuf>,
    },
    /// More than one candidate (count >= 2).
    Ambiguous { count: usize },
    /// No candidates.
    NotFound,
    /// Unique candidate, but its document matched no known layout.
    ExtractionFailed {
        candidate: Candidate,
        reason: String,
        document: Option<PathBuf>,
    },
    /// The source kept failing.
    SourceError { kind: SourceErrorKind },
}

impl ResolutionOutcome {
    /// Short label for logs and the review file.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Unique { candidate, .. } => format!("unique ({})", candidate.name),
            Self::Ambiguous { count } => format!("ambiguous ({count} candidates)"),
            Self::NotFound => "not found".to_string(),
            Self::ExtractionFailed { candidate, .. } => {
                format!("unexpected format ({})", candidate.name)
            }
            Self::SourceError { kind } => format!("source error ({kind})"),
        }
    }

    /// Whether a human should look at this row.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        !matches!(self, Self::Unique { .. })
    }
}

/// Input columns of a row. Never written by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowIdentifiers {
    /// Raw name parts (name 1..3), in column order.
    pub name_parts: Vec<String>,
    pub register_number: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    /// External keys (supplier / customer number).
    pub external_keys: Vec<String>,
}

/// Persisted state of one input row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowState {
    /// 1-based sheet row.
    pub index: u32,
    pub identifiers: RowIdentifiers,
    pub fields: ExtractedFields,
    pub document_path: Option<String>,
    pub change_flag: Option<bool>,
    pub last_checked: Option<String>,
    pub status: Option<String>,
}

/// A single field write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: Field,
    pub value: String,
}

/// Everything reconciliation wants written to one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowUpdate {
    pub changes: Vec<FieldChange>,
    /// Text for the status cell.
    pub status: String,
    /// `None` leaves the change flag untouched.
    pub change_flag: Option<bool>,
    pub document_path: Option<String>,
    pub last_checked: Option<NaiveDate>,
}

impl RowUpdate {
    /// Update that only writes a status.
    #[must_use]
    pub fn status_only(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    /// Whether any field value is written.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Value written for a field, if any.
    #[must_use]
    pub fn change_for(&self, field: Field) -> Option<&str> {
        self.changes
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_criteria_rejects_blank_keywords() {
        assert!(matches!(
            SearchCriteria::new("   "),
            Err(BpError::MissingKeywords)
        ));
        assert!(SearchCriteria::new("ACME GMBH").is_ok());
    }

    #[test]
    fn test_search_criteria_builders_drop_blank_values() {
        let criteria = SearchCriteria::new(" ACME GMBH ")
            .unwrap()
            .with_register_number("12345")
            .with_postal_code("  ");

        assert_eq!(criteria.keywords(), "ACME GMBH");
        assert_eq!(criteria.register_number.as_deref(), Some("12345"));
        assert_eq!(criteria.postal_code, None);
    }

    #[test]
    fn test_search_mode_from_cli() {
        assert_eq!(SearchMode::from_cli("all"), Some(SearchMode::All));
        assert_eq!(SearchMode::from_cli("min"), Some(SearchMode::Any));
        assert_eq!(SearchMode::from_cli("EXACT"), Some(SearchMode::Exact));
        assert_eq!(SearchMode::from_cli("fuzzy"), None);
        assert_eq!(SearchMode::Exact.form_value(), "3");
    }

    #[test]
    fn test_extracted_fields_absent_vs_blank() {
        let mut fields = ExtractedFields::default();
        fields.set(Field::Street, Some(String::new()));

        assert_eq!(fields.get(Field::Street), Some(""));
        assert_eq!(fields.get(Field::City), None);
    }

    #[test]
    fn test_outcome_needs_review() {
        assert!(ResolutionOutcome::NotFound.needs_review());
        assert!(ResolutionOutcome::Ambiguous { count: 2 }.needs_review());
        let unique = ResolutionOutcome::Unique {
            candidate: Candidate::new("ACME GMBH", "0"),
            fields: ExtractedFields::default(),
            document: None,
        };
        assert!(!unique.needs_review());
    }
}
