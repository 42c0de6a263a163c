//! Document field extraction.
//!
//! Register extracts come in a small, known set of layouts. Each layout is a
//! [`Layout`] with a signature check and a field extraction; the
//! [`Extractor`] tries them in registration order and the first one that
//! both matches and yields fields wins. API records skip the layouts and are
//! mapped directly.

mod layouts;
mod pdf;
mod record;
mod text;

use thiserror::Error;

pub use layouts::{AssociationRegisterLayout, CommercialRegisterLayout};
pub use pdf::pdf_to_text;
pub use text::{normalize_text, replace_umlauts, sheet_spelling, split_german_address, AddressParts};

use crate::source::RawContent;
use crate::types::ExtractedFields;

/// A known document layout.
pub trait Layout: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Check the layout signature on normalized text.
    fn matches(&self, text: &str) -> bool;

    /// Extract fields from normalized text.
    ///
    /// Returns `None` when a required part of the layout is missing.
    fn extract(&self, text: &str) -> Option<ExtractedFields>;
}

/// No known layout matched. Carries the original content, unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("document matches no known layout")]
pub struct LayoutNotRecognized {
    pub content: String,
}

/// Ordered set of layouts.
///
/// A layout whose signature matches but whose extraction comes back empty
/// does not end the search: the next layout gets the same text, and only
/// when every layout has declined is the document reported as
/// [`LayoutNotRecognized`].
pub struct Extractor {
    layouts: Vec<Box<dyn Layout>>,
}

impl Extractor {
    /// Create an extractor without any layouts.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            layouts: Vec::new(),
        }
    }

    /// Create an extractor with all known layouts.
    #[must_use]
    pub fn new() -> Self {
        let mut extractor = Self::empty();
        extractor.register(CommercialRegisterLayout);
        extractor.register(AssociationRegisterLayout);
        extractor
    }

    /// Append a layout; earlier layouts take precedence.
    pub fn register(&mut self, layout: impl Layout + 'static) {
        self.layouts.push(Box::new(layout));
    }

    /// Names of the registered layouts, in order.
    #[must_use]
    pub fn layout_names(&self) -> Vec<&'static str> {
        self.layouts.iter().map(|l| l.name()).collect()
    }

    /// Extract fields from fetched content.
    pub fn extract(&self, content: &RawContent) -> Result<ExtractedFields, LayoutNotRecognized> {
        match content {
            RawContent::Text { text, .. } => self.extract_text(text),
            RawContent::Record(value) => record::fields_from_record(value).ok_or_else(|| {
                LayoutNotRecognized {
                    content: serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
                }
            }),
        }
    }

    fn extract_text(&self, original: &str) -> Result<ExtractedFields, LayoutNotRecognized> {
        let text = normalize_text(original);

        for layout in &self.layouts {
            if !layout.matches(&text) {
                continue;
            }
            match layout.extract(&text) {
                Some(fields) => {
                    tracing::debug!(layout = layout.name(), "Layout matched");
                    return Ok(fields);
                }
                None => {
                    tracing::debug!(layout = layout.name(), "Layout signature matched but fields are incomplete");
                }
            }
        }

        Err(LayoutNotRecognized {
            content: original.to_string(),
        })
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}
