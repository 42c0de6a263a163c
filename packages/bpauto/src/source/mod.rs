//! Registry sources.
//!
//! The resolver only sees the [`Source`] trait. Two implementations exist:
//! [`HandelsregisterSource`] drives the register's web UI over an HTTP
//! session, [`NorthDataSource`] talks to the NorthData REST API. One of them
//! is chosen at batch start and owned by the batch for its whole run.

mod handelsregister;
pub(crate) mod northdata;

use std::fmt;

pub use handelsregister::{HandelsregisterConfig, HandelsregisterSource, HourlyQuota};
pub use northdata::NorthDataSource;

use crate::types::{Candidate, SearchCriteria};

/// Classified failure of a source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFailure {
    /// Worth retrying: timeouts, rate limiting, server errors, UI drift.
    Transient(String),
    /// Retrying will not help: the request itself was rejected.
    Terminal(String),
    /// Credentials were rejected. Aborts the whole batch.
    Auth(String),
}

impl SourceFailure {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Terminal(m) | Self::Auth(m) => m,
        }
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient: {m}"),
            Self::Terminal(m) => write!(f, "terminal: {m}"),
            Self::Auth(m) => write!(f, "authentication: {m}"),
        }
    }
}

/// Raw document as fetched from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawContent {
    /// Text of an official register extract, plus the original PDF bytes
    /// when the source delivered one.
    Text { text: String, pdf: Option<Vec<u8>> },
    /// A structured record (API sources).
    Record(serde_json::Value),
}

impl RawContent {
    /// Plain text content without a PDF.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            pdf: None,
        }
    }

    /// Bytes worth archiving: the PDF if present, else the textual form.
    #[must_use]
    pub fn archive_bytes(&self) -> Vec<u8> {
        match self {
            Self::Text { pdf: Some(pdf), .. } => pdf.clone(),
            Self::Text { text, pdf: None } => text.as_bytes().to_vec(),
            Self::Record(value) => serde_json::to_vec_pretty(value).unwrap_or_default(),
        }
    }

    /// File extension matching [`Self::archive_bytes`].
    #[must_use]
    pub fn archive_extension(&self) -> &'static str {
        match self {
            Self::Text { pdf: Some(_), .. } => "pdf",
            Self::Text { pdf: None, .. } => "txt",
            Self::Record(_) => "json",
        }
    }
}

/// Capability interface of a registry source.
pub trait Source {
    /// Human-readable source name for logs and errors.
    fn name(&self) -> &'static str;

    /// Search for candidates matching the criteria.
    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Candidate>, SourceFailure>;

    /// Fetch the primary document of a candidate from the last search.
    fn fetch_document(&mut self, candidate: &Candidate) -> Result<RawContent, SourceFailure>;
}
