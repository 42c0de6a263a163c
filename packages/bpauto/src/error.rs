//! Error types for bpauto.
//!
//! Per-row problems (ambiguity, unrecognised documents, exhausted retries)
//! are not errors: they end up in the row's status cell. `BpError` covers
//! what stops a run or an individual I/O step.

use thiserror::Error;

/// Main error type for the bpauto library.
#[derive(Debug, Error)]
pub enum BpError {
    /// A search was requested without any keywords.
    #[error("Missing search keywords: the company name must not be empty")]
    MissingKeywords,

    /// Invalid spreadsheet column letter.
    #[error("Invalid column '{value}' for {field}. Expected letters A-XFD (e.g., T, AA)")]
    InvalidColumn { field: String, value: String },

    /// Invalid row range.
    #[error("Invalid row range {start}..={end}: rows are 1-based and start must not exceed end")]
    InvalidRowRange { start: u32, end: u32 },

    /// Sheet does not exist in the workbook.
    #[error("Sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    /// Unsupported store file type.
    #[error("Unsupported spreadsheet format: {0} (expected .xlsx or .csv)")]
    UnsupportedFormat(String),

    /// Generic configuration problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// API key missing for the API-backed source.
    #[error("NORTHDATA_API_KEY must be set (environment variable or .env file)")]
    MissingApiKey,

    /// The API rejected our credentials.
    #[error("Authentication against {source_name} failed: {message}")]
    Authentication {
        source_name: String,
        message: String,
    },

    /// Single-shot target row does not belong to the given external key.
    #[error("Row {row} does not carry external key '{key}' (found: {found})")]
    IdentityMismatch { row: u32, key: String, found: String },

    /// Text extraction from a PDF failed.
    #[error("Could not extract text from PDF: {0}")]
    PdfText(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON (de)serialization error.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a workbook failed.
    #[error("Failed to read workbook: {0}")]
    WorkbookRead(#[from] calamine::Error),

    /// The workbook package could not be read or rewritten.
    #[error("Failed to write workbook: {0}")]
    WorkbookArchive(#[from] zip::result::ZipError),

    /// A workbook part is not well-formed XML.
    #[error("Malformed workbook XML: {0}")]
    WorkbookXml(#[from] quick_xml::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for bpauto operations.
pub type Result<T> = std::result::Result<T, BpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BpError::InvalidColumn {
            field: "city".to_string(),
            value: "1A".to_string(),
        };
        assert!(err.to_string().contains("1A"));
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn test_authentication_display() {
        let err = BpError::Authentication {
            source_name: "NorthData".to_string(),
            message: "HTTP 401".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Authentication against NorthData failed: HTTP 401"
        );
    }
}
