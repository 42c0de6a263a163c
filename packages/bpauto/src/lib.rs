//! bpauto - verify business partners against the German commercial register.
//!
//! For each row of a partner workbook, bpauto searches a registry source for
//! the company, fetches its register document, extracts the registered name,
//! register number and address, and writes back what changed.
//!
//! # Example
//!
//! ```
//! use bpauto::config;
//! use bpauto::input::combine_name_parts;
//!
//! // Validate a column letter and pick the name to search for
//! assert_eq!(config::column_index("city", "Z").unwrap(), 25);
//! assert_eq!(
//!     combine_name_parts(&["ACME Holding", "GmbH", "N/A"]).as_deref(),
//!     Some("ACME Holding GmbH")
//! );
//! ```
//!
//! # Architecture
//!
//! The pipeline is organized into several modules:
//!
//! - [`config`]: Constants, column mapping and validation
//! - [`types`]: Core data types (SearchCriteria, ResolutionOutcome, RowUpdate, etc.)
//! - [`error`]: Error types and Result alias
//! - [`http`]: HTTP client and failure classification
//! - [`source`]: Registry sources (register web UI, NorthData API)
//! - [`extract`]: Field extraction from register documents and API records
//! - [`resolve`]: Search, cardinality check and document fetch with bounded retry
//! - [`reconcile`]: Change detection between extracted fields and row state
//! - [`store`]: Spreadsheet row store (.xlsx, .csv)
//! - [`input`]: Search input from sheet rows
//! - [`batch`]: Batch and single-shot drivers
//! - [`cli`]: Command-line interface

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod input;
pub mod reconcile;
pub mod resolve;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use error::{BpError, Result};
pub use reconcile::Reconciler;
pub use resolve::Resolver;
pub use types::{
    Candidate, ExtractedFields, Field, ResolutionOutcome, RowState, RowUpdate, SearchCriteria,
    SearchMode,
};
