//! Configuration constants, column mapping and validation functions.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{BpError, Result};
use crate::types::Field;

/// Maximum attempts per source call, including the first one.
pub const MAX_ATTEMPTS: u32 = 3;

/// Status written when the source returned no candidates.
pub const STATUS_NOT_FOUND: &str = "0";

/// Status written when the document matched no known layout.
pub const STATUS_UNEXPECTED_FORMAT: &str = "Unexpected format";

/// Status prefix written when the source kept failing.
pub const STATUS_SOURCE_ERROR: &str = "Source error";

/// Change-flag cell values.
pub const CHANGE_FLAG_YES: &str = "yes";
pub const CHANGE_FLAG_NO: &str = "no";

/// Date format of the last-checked cell.
pub const LAST_CHECKED_FORMAT: &str = "%d.%m.%Y";

/// Default first data row (rows 1-2 hold headers in the partner workbook).
pub const DEFAULT_START_ROW: u32 = 3;

/// Consecutive source errors after which a batch cools down.
pub const COOLDOWN_AFTER_ERRORS: u32 = 3;

/// Default cool-down when the register starts refusing requests.
pub const DEFAULT_COOLDOWN_SECS: u64 = 600;

/// Searches the register allows per rolling hour.
pub const UI_SEARCHES_PER_HOUR: u32 = 60;

/// Base URL of the commercial register web UI.
pub const HANDELSREGISTER_URL: &str = "https://www.handelsregister.de/rp_web";

/// Base URL of the NorthData API.
pub const NORTHDATA_URL: &str = "https://www.northdata.de";

/// HTTP timeout for the register UI, which is slow to render result pages.
pub const UI_TIMEOUT_SECS: u64 = 90;

/// Connect and read timeouts for the NorthData API.
pub const API_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const API_TIMEOUT_SECS: u64 = 30;

/// User agent string identifying this tool.
pub const USER_AGENT: &str = concat!("bpauto/", env!("CARGO_PKG_VERSION"));

/// Spreadsheet column: one to three letters.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static COLUMN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{1,3}$").expect("valid regex"));

/// Last column Excel supports (XFD).
const MAX_COLUMN_INDEX: usize = 16_383;

/// Validate a column letter and return its 0-based index.
///
/// # Arguments
/// * `field` - Logical name of the column, used in the error message
/// * `letters` - Column letters (case-insensitive, surrounding spaces ignored)
///
/// # Examples
/// ```
/// use bpauto::config::column_index;
///
/// assert_eq!(column_index("city", "A").unwrap(), 0);
/// assert_eq!(column_index("city", "aa").unwrap(), 26);
/// assert!(column_index("city", "A1").is_err());
/// ```
pub fn column_index(field: &str, letters: &str) -> Result<usize> {
    let normalized = letters.trim().to_uppercase();
    let invalid = || BpError::InvalidColumn {
        field: field.to_string(),
        value: letters.to_string(),
    };

    if !COLUMN_PATTERN.is_match(&normalized) {
        return Err(invalid());
    }

    let index = normalized
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A' + 1))
        - 1;

    if index > MAX_COLUMN_INDEX {
        return Err(invalid());
    }
    Ok(index)
}

/// Convert a 0-based column index back to letters (0 = A, 26 = AA).
#[must_use]
pub fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Validate an inclusive, 1-based row range.
///
/// # Examples
/// ```
/// use bpauto::config::validate_row_range;
///
/// assert!(validate_row_range(3, 10).is_ok());
/// assert!(validate_row_range(0, 10).is_err());
/// assert!(validate_row_range(10, 3).is_err());
/// ```
pub fn validate_row_range(start: u32, end: u32) -> Result<()> {
    if start == 0 || end < start {
        return Err(BpError::InvalidRowRange { start, end });
    }
    Ok(())
}

/// Mapping from logical fields to physical spreadsheet columns.
///
/// Defaults follow the partner workbook layout; any subset can be
/// overridden from a YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnMapping {
    /// Primary company name (search input).
    pub name: String,
    /// Additional name parts combined with `name`.
    pub name_extra: Vec<String>,
    /// Supplier number (external key).
    pub supplier_key: Option<String>,
    /// Customer number (external key).
    pub customer_key: Option<String>,
    pub country: Option<String>,

    pub legal_name: String,
    pub register_type: String,
    pub register_number: String,
    pub street: String,
    pub house_number: String,
    pub postal_code: String,
    pub city: String,

    pub document_path: String,
    pub change_flag: String,
    pub last_checked: String,
    pub status: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            name: "C".into(),
            name_extra: vec!["D".into(), "E".into()],
            supplier_key: Some("A".into()),
            customer_key: Some("B".into()),
            country: Some("J".into()),
            legal_name: "T".into(),
            register_number: "U".into(),
            register_type: "V".into(),
            street: "X".into(),
            house_number: "Y".into(),
            city: "Z".into(),
            postal_code: "AA".into(),
            document_path: "P".into(),
            change_flag: "Q".into(),
            last_checked: "S".into(),
            status: "W".into(),
        }
    }
}

impl ColumnMapping {
    /// Load a mapping from a YAML file; keys not present keep their default.
    ///
    /// An empty file yields the default mapping.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BpError::Config(format!(
                "Mapping file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a mapping from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mapping: Self = serde_yaml_ng::from_str(content)?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Column letters of an output field.
    #[must_use]
    pub fn field_column(&self, field: Field) -> &str {
        match field {
            Field::LegalName => &self.legal_name,
            Field::RegisterType => &self.register_type,
            Field::RegisterNumber => &self.register_number,
            Field::Street => &self.street,
            Field::HouseNumber => &self.house_number,
            Field::PostalCode => &self.postal_code,
            Field::City => &self.city,
        }
    }

    /// Check every configured column letter.
    pub fn validate(&self) -> Result<()> {
        column_index("name", &self.name)?;
        for extra in &self.name_extra {
            column_index("name_extra", extra)?;
        }
        for (label, column) in [
            ("supplier_key", &self.supplier_key),
            ("customer_key", &self.customer_key),
            ("country", &self.country),
        ] {
            if let Some(column) = column {
                column_index(label, column)?;
            }
        }
        for field in Field::ALL {
            column_index(field.as_str(), self.field_column(field))?;
        }
        for (label, column) in [
            ("document_path", &self.document_path),
            ("change_flag", &self.change_flag),
            ("last_checked", &self.last_checked),
            ("status", &self.status),
        ] {
            column_index(label, column)?;
        }
        Ok(())
    }
}

/// Settings for the NorthData API source.
///
/// NOTE: Do NOT derive `Debug` on this struct, `api_key` would be exposed.
#[derive(Clone)]
pub struct NorthDataConfig {
    pub api_key: String,
    pub base_url: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl NorthDataConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: NORTHDATA_URL.to_string(),
            connect_timeout: Duration::from_secs(API_CONNECT_TIMEOUT_SECS),
            timeout: Duration::from_secs(API_TIMEOUT_SECS),
        }
    }

    /// Read `NORTHDATA_API_KEY` and optional `NORTHDATA_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("NORTHDATA_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(BpError::MissingApiKey)?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("NORTHDATA_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}
