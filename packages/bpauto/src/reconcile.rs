//! Reconciliation of resolution outcomes into row updates.

use chrono::{Local, NaiveDate};

use crate::config::{STATUS_NOT_FOUND, STATUS_SOURCE_ERROR, STATUS_UNEXPECTED_FORMAT};
use crate::extract::sheet_spelling;
use crate::types::{
    ExtractedFields, Field, FieldChange, ResolutionOutcome, RowState, RowUpdate, SourceErrorKind,
};

/// Turns an outcome plus the previous row state into a [`RowUpdate`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    /// Flag rows whose previously empty fields got filled.
    flag_new_fields: bool,
    /// Write address fields upper-cased and transliterated.
    sheet_spelling: bool,
    today: NaiveDate,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(Local::now().date_naive())
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(today: NaiveDate) -> Self {
        Self {
            flag_new_fields: false,
            sheet_spelling: false,
            today,
        }
    }

    #[must_use]
    pub fn with_flag_new_fields(mut self, flag: bool) -> Self {
        self.flag_new_fields = flag;
        self
    }

    #[must_use]
    pub fn with_sheet_spelling(mut self, enabled: bool) -> Self {
        self.sheet_spelling = enabled;
        self
    }

    /// Compute the update for one row. Exactly one outcome branch applies.
    #[must_use]
    pub fn reconcile(&self, outcome: &ResolutionOutcome, previous: &RowState) -> RowUpdate {
        match outcome {
            ResolutionOutcome::Unique {
                fields, document, ..
            } => {
                let (changes, flagged) = self.diff(fields, &previous.fields);
                RowUpdate {
                    changes,
                    status: String::new(),
                    change_flag: flagged.then_some(true),
                    document_path: document.as_ref().map(|p| p.display().to_string()),
                    last_checked: Some(self.today),
                }
            }
            ResolutionOutcome::Ambiguous { count } => RowUpdate::status_only(count.to_string()),
            ResolutionOutcome::NotFound => RowUpdate::status_only(STATUS_NOT_FOUND),
            ResolutionOutcome::ExtractionFailed { document, .. } => RowUpdate {
                document_path: document.as_ref().map(|p| p.display().to_string()),
                ..RowUpdate::status_only(STATUS_UNEXPECTED_FORMAT)
            },
            ResolutionOutcome::SourceError { kind } => {
                let detail = match kind {
                    SourceErrorKind::RetriesExhausted { .. } => "retries exhausted".to_string(),
                    SourceErrorKind::Terminal(reason) => reason.clone(),
                };
                RowUpdate::status_only(format!("{STATUS_SOURCE_ERROR}: {detail}"))
            }
        }
    }

    fn diff(&self, new: &ExtractedFields, previous: &ExtractedFields) -> (Vec<FieldChange>, bool) {
        let mut changes = Vec::new();
        let mut flagged = false;

        for field in Field::ALL {
            let Some(value) = new.get(field) else {
                continue;
            };
            let value = self.spelled(field, value);
            let old = previous.get(field).map(str::trim).unwrap_or_default();

            if old.is_empty() {
                if value.is_empty() {
                    continue;
                }
                flagged |= self.flag_new_fields;
            } else if materially_equal(old, &value) {
                continue;
            } else {
                tracing::info!(field = %field, old, new = %value, "Field value changed");
                flagged = true;
            }
            changes.push(FieldChange { field, value });
        }

        (changes, flagged)
    }

    fn spelled(&self, field: Field, value: &str) -> String {
        match field {
            Field::Street | Field::HouseNumber | Field::PostalCode | Field::City
                if self.sheet_spelling =>
            {
                sheet_spelling(value)
            }
            _ => value.trim().to_string(),
        }
    }
}

/// Whether two cell values mean the same thing.
///
/// Ignores surrounding and repeated whitespace, case, umlaut transliteration
/// and the `STR.` abbreviation.
///
/// # Examples
/// ```
/// use bpauto::reconcile::materially_equal;
///
/// assert!(materially_equal("MUENCHEN", " München "));
/// assert!(materially_equal("Hauptstr.", "HAUPTSTRASSE"));
/// assert!(!materially_equal("Berlin", "Bern"));
/// ```
#[must_use]
pub fn materially_equal(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

fn fold(value: &str) -> String {
    sheet_spelling(&value.split_whitespace().collect::<Vec<_>>().join(" "))
}
