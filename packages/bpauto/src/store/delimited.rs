//! `.csv` backend.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::Grid;
use crate::error::Result;

/// Read a CSV file as a single sheet.
///
/// The delimiter (`;` or `,`) is taken from the first line; German exports
/// usually use `;`.
pub(super) fn read_csv(path: &Path) -> Result<(Grid, u8)> {
    let delimiter = detect_delimiter(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((Grid::from_rows(name, &rows), delimiter))
}

/// Write the sheet to `path` with the given delimiter.
pub(super) fn write_csv(path: &Path, grid: &Grid, delimiter: u8) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)?;
    for row in grid.text_rows() {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut first_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first_line)?;
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    Ok(if semicolons > commas { b';' } else { b',' })
}
