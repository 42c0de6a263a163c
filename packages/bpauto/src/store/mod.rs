//! Row store: the spreadsheet the pipeline reads from and writes back to.
//!
//! The whole file is loaded into memory as a [`Grid`] per sheet. Rows are
//! read and updated in memory, and the store remembers which cells it wrote.
//! [`RowStore::persist`] writes to a temporary sibling, syncs it and renames
//! it over the original, so an interrupted run never leaves a torn file
//! behind. Workbooks are patched cell by cell; CSV files are rewritten with
//! every untouched cell as it was read.

mod delimited;
mod workbook;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::config::{
    column_index, ColumnMapping, CHANGE_FLAG_NO, CHANGE_FLAG_YES, LAST_CHECKED_FORMAT,
};
use crate::error::{BpError, Result};
use crate::types::{ExtractedFields, Field, RowIdentifiers, RowState, RowUpdate};

/// Capability interface of the row store.
pub trait RowStore {
    /// Read the current state of a 1-based row.
    fn read_row(&self, index: u32) -> Result<RowState>;

    /// Apply an update to a 1-based row (in memory).
    fn write_row(&mut self, index: u32, update: &RowUpdate) -> Result<()>;

    /// Write all applied updates to durable storage.
    fn persist(&mut self) -> Result<()>;
}

/// Cells written since the last persist, by 0-based `(row, col)`.
pub(crate) type CellEdits = BTreeMap<(usize, usize), CellValue>;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    /// Cell content as trimmed text; integral numbers lose their `.0`.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        }
    }

    /// Cell content as stored, for writing back.
    fn raw_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            other => other.as_text(),
        }
    }

    fn text_or_empty(value: &str) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value.to_string())
        }
    }
}

/// One sheet, as a sparse-at-the-end grid of cells (0-based).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grid {
    pub name: String,
    rows: Vec<Vec<CellValue>>,
}

impl Grid {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Build a grid from text rows (row 0 = sheet row 1).
    #[must_use]
    pub fn from_rows<S: AsRef<str>>(name: impl Into<String>, rows: &[Vec<S>]) -> Self {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| CellValue::text_or_empty(c.as_ref())).collect())
            .collect();
        Self {
            name: name.into(),
            rows,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Cell text, empty for missing cells.
    #[must_use]
    pub fn text(&self, row: usize, col: usize) -> String {
        self.get(row, col).map(CellValue::as_text).unwrap_or_default()
    }

    pub fn set(&mut self, row: usize, col: usize, value: CellValue) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, CellValue::Empty);
        }
        cells[col] = value;
    }

    pub fn set_text(&mut self, row: usize, col: usize, value: &str) {
        self.set(row, col, CellValue::text_or_empty(value));
    }

    /// Non-empty cells as `(row, col, value)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &CellValue)> {
        self.rows.iter().enumerate().flat_map(|(r, cells)| {
            cells
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != CellValue::Empty)
                .map(move |(c, v)| (r, c, v))
        })
    }

    /// Rows as text, for CSV output.
    fn text_rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows
            .iter()
            .map(|cells| cells.iter().map(CellValue::raw_text).collect())
    }
}

/// Column indices resolved from a [`ColumnMapping`].
#[derive(Debug, Clone)]
struct Columns {
    name: usize,
    name_extra: Vec<usize>,
    supplier_key: Option<usize>,
    customer_key: Option<usize>,
    country: Option<usize>,
    fields: Vec<(Field, usize)>,
    document_path: usize,
    change_flag: usize,
    last_checked: usize,
    status: usize,
}

impl Columns {
    fn resolve(mapping: &ColumnMapping) -> Result<Self> {
        let optional = |label: &str, col: &Option<String>| {
            col.as_deref().map(|c| column_index(label, c)).transpose()
        };
        Ok(Self {
            name: column_index("name", &mapping.name)?,
            name_extra: mapping
                .name_extra
                .iter()
                .map(|c| column_index("name_extra", c))
                .collect::<Result<_>>()?,
            supplier_key: optional("supplier_key", &mapping.supplier_key)?,
            customer_key: optional("customer_key", &mapping.customer_key)?,
            country: optional("country", &mapping.country)?,
            fields: Field::ALL
                .iter()
                .map(|f| Ok((*f, column_index(f.as_str(), mapping.field_column(*f))?)))
                .collect::<Result<_>>()?,
            document_path: column_index("document_path", &mapping.document_path)?,
            change_flag: column_index("change_flag", &mapping.change_flag)?,
            last_checked: column_index("last_checked", &mapping.last_checked)?,
            status: column_index("status", &mapping.status)?,
        })
    }

    fn field(&self, field: Field) -> usize {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, c)| *c)
            .unwrap_or(self.name)
    }
}

/// Backing file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Xlsx,
    Csv { delimiter: u8 },
    /// Nothing on disk; `persist` only counts.
    Memory,
}

impl StoreFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" => Ok(Self::Xlsx),
            "csv" => Ok(Self::Csv { delimiter: b',' }),
            _ => Err(BpError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Spreadsheet-backed [`RowStore`].
#[derive(Debug, Clone)]
pub struct SheetStore {
    path: PathBuf,
    format: StoreFormat,
    sheets: Vec<Grid>,
    active: usize,
    columns: Columns,
    edits: CellEdits,
    persist_count: usize,
}

impl SheetStore {
    /// Open a workbook or CSV file.
    ///
    /// # Arguments
    /// * `path` - `.xlsx` or `.csv` file
    /// * `sheet` - Sheet to work on; the first sheet when `None`
    /// * `mapping` - Column mapping
    pub fn open(path: &Path, sheet: Option<&str>, mapping: &ColumnMapping) -> Result<Self> {
        let columns = Columns::resolve(mapping)?;
        let format = StoreFormat::from_path(path)?;

        let (format, sheets) = match format {
            StoreFormat::Xlsx => (format, workbook::read_workbook(path)?),
            StoreFormat::Csv { .. } => {
                let (grid, delimiter) = delimited::read_csv(path)?;
                (StoreFormat::Csv { delimiter }, vec![grid])
            }
            StoreFormat::Memory => (format, Vec::new()),
        };

        let active = match sheet {
            Some(name) => sheets
                .iter()
                .position(|g| g.name == name)
                .ok_or_else(|| BpError::SheetNotFound(name.to_string()))?,
            None if sheets.is_empty() => {
                return Err(BpError::SheetNotFound("(first sheet)".to_string()));
            }
            None => 0,
        };

        tracing::info!(
            path = %path.display(),
            sheet = %sheets[active].name,
            rows = sheets[active].row_count(),
            "Opened row store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            sheets,
            active,
            columns,
            edits: CellEdits::new(),
            persist_count: 0,
        })
    }

    /// A store that only lives in memory.
    pub fn in_memory(grid: Grid, mapping: &ColumnMapping) -> Result<Self> {
        Ok(Self {
            path: PathBuf::new(),
            format: StoreFormat::Memory,
            sheets: vec![grid],
            active: 0,
            columns: Columns::resolve(mapping)?,
            edits: CellEdits::new(),
            persist_count: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The sheet being worked on.
    #[must_use]
    pub fn grid(&self) -> &Grid {
        &self.sheets[self.active]
    }

    /// How often the store was persisted.
    #[must_use]
    pub fn persist_count(&self) -> usize {
        self.persist_count
    }

    /// Last 1-based row with a company name at or after `start`.
    #[must_use]
    pub fn last_row_with_name(&self, start: u32) -> Option<u32> {
        let grid = self.grid();
        (start.max(1) as usize - 1..grid.row_count())
            .rev()
            .find(|&r| !grid.text(r, self.columns.name).is_empty())
            .and_then(|r| u32::try_from(r + 1).ok())
    }

    fn row0(index: u32) -> Result<usize> {
        if index == 0 {
            return Err(BpError::InvalidRowRange {
                start: index,
                end: index,
            });
        }
        Ok(index as usize - 1)
    }

    /// Set a cell of the active sheet and remember it for the next persist.
    fn put(&mut self, row: usize, col: usize, value: &str) {
        let value = CellValue::text_or_empty(value);
        self.sheets[self.active].set(row, col, value.clone());
        self.edits.insert((row, col), value);
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl RowStore for SheetStore {
    fn read_row(&self, index: u32) -> Result<RowState> {
        let row = Self::row0(index)?;
        let grid = self.grid();
        let cols = &self.columns;
        let text = |col: usize| grid.text(row, col);
        let optional = |col: Option<usize>| col.map(|c| text(c)).and_then(non_empty);

        let mut fields = ExtractedFields::default();
        for (field, col) in &cols.fields {
            fields.set(*field, non_empty(text(*col)));
        }

        let identifiers = RowIdentifiers {
            name_parts: std::iter::once(cols.name)
                .chain(cols.name_extra.iter().copied())
                .map(text)
                .collect(),
            register_number: non_empty(text(cols.field(Field::RegisterNumber))),
            postal_code: non_empty(text(cols.field(Field::PostalCode))),
            country: optional(cols.country),
            external_keys: [cols.supplier_key, cols.customer_key]
                .into_iter()
                .filter_map(optional)
                .collect(),
        };

        let change_flag = match text(cols.change_flag).to_lowercase().as_str() {
            v if v == CHANGE_FLAG_YES => Some(true),
            v if v == CHANGE_FLAG_NO => Some(false),
            _ => None,
        };

        Ok(RowState {
            index,
            identifiers,
            fields,
            document_path: non_empty(text(cols.document_path)),
            change_flag,
            last_checked: non_empty(text(cols.last_checked)),
            status: non_empty(text(cols.status)),
        })
    }

    fn write_row(&mut self, index: u32, update: &RowUpdate) -> Result<()> {
        let row = Self::row0(index)?;
        let cols = self.columns.clone();

        for change in &update.changes {
            self.put(row, cols.field(change.field), &change.value);
        }
        self.put(row, cols.status, &update.status);
        if let Some(flag) = update.change_flag {
            self.put(
                row,
                cols.change_flag,
                if flag { CHANGE_FLAG_YES } else { CHANGE_FLAG_NO },
            );
        }
        if let Some(path) = &update.document_path {
            self.put(row, cols.document_path, path);
        }
        if let Some(date) = update.last_checked {
            self.put(
                row,
                cols.last_checked,
                &date.format(LAST_CHECKED_FORMAT).to_string(),
            );
        }

        tracing::debug!(row = index, changes = update.changes.len(), status = %update.status, "Row updated");
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        match self.format {
            StoreFormat::Xlsx => {
                let sheet = &self.sheets[self.active].name;
                write_atomic(&self.path, |tmp| {
                    workbook::patch_workbook(&self.path, tmp, sheet, &self.edits)
                })?;
            }
            StoreFormat::Csv { delimiter } => {
                let grid = &self.sheets[self.active];
                write_atomic(&self.path, |tmp| delimited::write_csv(tmp, grid, delimiter))?;
            }
            StoreFormat::Memory => {}
        }
        self.edits.clear();
        self.persist_count += 1;
        tracing::debug!(path = %self.path.display(), "Row store persisted");
        Ok(())
    }
}

/// Write a file through a temporary sibling, then sync and rename it.
fn write_atomic(path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BpError::Config(format!("Not a file path: {}", path.display())))?;
    let temp_file = path.with_file_name(format!(".{file_name}.tmp"));

    if let Err(e) = write(&temp_file) {
        let _ = fs::remove_file(&temp_file);
        return Err(e);
    }
    File::open(&temp_file)?.sync_all()?;

    // On Windows, rename fails if the destination already exists
    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path)?;
    }

    fs::rename(&temp_file, path)?;
    Ok(())
}
