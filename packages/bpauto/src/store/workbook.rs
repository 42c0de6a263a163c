//! `.xlsx` backend: calamine reads the cell values, saving patches the
//! edited cells into the original package.
//!
//! Every archive part except the edited worksheet is copied as is, and inside
//! that worksheet only the edited cells are replaced. Styles, formulas, dates
//! and the other sheets stay exactly as they were.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader as _};
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{CellEdits, CellValue, Grid};
use crate::config::column_letters;
use crate::error::{BpError, Result};

/// Edited cells of one sheet, by 1-based row and 0-based column.
type RowEdits<'e> = BTreeMap<u32, BTreeMap<usize, &'e CellValue>>;

/// Read every sheet of a workbook.
pub(super) fn read_workbook(path: &Path) -> Result<Vec<Grid>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = workbook.worksheet_range(&name)?;
        let (row_offset, col_offset) = range
            .start()
            .map_or((0, 0), |(r, c)| (r as usize, c as usize));

        let mut grid = Grid::new(name);
        for (row, col, cell) in range.used_cells() {
            let value = match cell {
                Data::Empty => continue,
                Data::String(s) => CellValue::Text(s.clone()),
                Data::Float(n) => CellValue::Number(*n),
                Data::Int(n) => CellValue::Number(*n as f64),
                Data::Bool(b) => CellValue::Bool(*b),
                Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
                Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
                Data::Error(e) => CellValue::Text(format!("#{e:?}")),
            };
            grid.set(row_offset + row, col_offset + col, value);
        }
        sheets.push(grid);
    }

    Ok(sheets)
}

/// Copy the workbook at `source` to `dest` with `edits` applied to `sheet`.
pub(super) fn patch_workbook(source: &Path, dest: &Path, sheet: &str, edits: &CellEdits) -> Result<()> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))?;
    let sheet_path = worksheet_path(&mut archive, sheet)?;
    let patched = patch_sheet_xml(&read_entry(&mut archive, &sheet_path)?, edits)?;

    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if entry.name() == sheet_path {
            drop(entry);
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(sheet_path.as_str(), options)?;
            writer.write_all(patched.as_bytes())?;
        } else {
            writer.raw_copy_file(entry)?;
        }
    }
    writer.finish()?.flush()?;

    tracing::debug!(sheet, part = %sheet_path, cells = edits.len(), "Patched workbook");
    Ok(())
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut content = String::new();
    archive.by_name(name)?.read_to_string(&mut content)?;
    Ok(content)
}

/// Archive path of the worksheet named `sheet`, via workbook.xml and its rels.
fn worksheet_path<R: Read + Seek>(archive: &mut ZipArchive<R>, sheet: &str) -> Result<String> {
    let workbook = read_entry(archive, "xl/workbook.xml")?;
    let rels = read_entry(archive, "xl/_rels/workbook.xml.rels")?;
    let not_found = || BpError::SheetNotFound(sheet.to_string());

    let rel_id = element_attributes(&workbook, b"sheet")?
        .into_iter()
        .find(|attrs| attrs.get("name").map(String::as_str) == Some(sheet))
        .and_then(|mut attrs| attrs.remove("r:id"))
        .ok_or_else(not_found)?;
    let target = element_attributes(&rels, b"Relationship")?
        .into_iter()
        .find(|attrs| attrs.get("Id") == Some(&rel_id))
        .and_then(|mut attrs| attrs.remove("Target"))
        .ok_or_else(not_found)?;

    Ok(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    })
}

/// Attributes of every element with the given local name.
fn element_attributes(xml: &str, local_name: &[u8]) -> Result<Vec<HashMap<String, String>>> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == local_name => {
                found.push(
                    e.attributes()
                        .flatten()
                        .map(|a| {
                            let raw = String::from_utf8_lossy(&a.value).into_owned();
                            let value = unescape(&raw).map(|v| v.into_owned()).unwrap_or_else(|_| raw.clone());
                            (String::from_utf8_lossy(a.key.as_ref()).into_owned(), value)
                        })
                        .collect(),
                );
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

/// Raw value of one attribute.
fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// `"AA12"` to `(12, 26)`.
fn parse_cell_ref(reference: &str) -> Option<(u32, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    let col = letters.bytes().try_fold(0usize, |acc, b| {
        b.is_ascii_uppercase()
            .then(|| acc * 26 + usize::from(b - b'A') + 1)
    })?;
    Some((digits.parse().ok()?, col.checked_sub(1)?))
}

fn cell_xml(row: u32, col: usize, style: Option<&str>, value: &CellValue) -> String {
    let reference = format!("{}{row}", column_letters(col));
    let style = style.map(|s| format!(" s=\"{s}\"")).unwrap_or_default();
    match value {
        CellValue::Empty => format!("<c r=\"{reference}\"{style}/>"),
        CellValue::Text(text) => format!(
            "<c r=\"{reference}\"{style} t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
            escape(text.as_str())
        ),
        CellValue::Number(n) => format!("<c r=\"{reference}\"{style}><v>{n}</v></c>"),
        CellValue::Bool(b) => format!("<c r=\"{reference}\"{style} t=\"b\"><v>{}</v></c>", u8::from(*b)),
    }
}

/// Entries with keys below `key`, leaving the rest in `map`.
fn take_before<K: Ord, V>(map: &mut BTreeMap<K, V>, key: &K) -> BTreeMap<K, V> {
    let later = map.split_off(key);
    std::mem::replace(map, later)
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

/// Output of a worksheet patch: untouched byte ranges are copied verbatim.
struct SheetPatch<'x> {
    xml: &'x str,
    out: String,
    copied: usize,
}

impl SheetPatch<'_> {
    fn copy_to(&mut self, pos: usize) {
        if pos > self.copied {
            self.out.push_str(&self.xml[self.copied..pos]);
            self.copied = pos;
        }
    }

    fn skip_to(&mut self, pos: usize) {
        self.copied = pos;
    }

    fn new_cells(&mut self, row: u32, cells: &BTreeMap<usize, &CellValue>) {
        for (col, value) in cells {
            self.out.push_str(&cell_xml(row, *col, None, value));
        }
    }

    fn new_rows(&mut self, rows: RowEdits<'_>) {
        for (row, cells) in rows {
            self.out.push_str(&format!("<row r=\"{row}\">"));
            self.new_cells(row, &cells);
            self.out.push_str("</row>");
        }
    }

    fn finish(mut self) -> String {
        self.copy_to(self.xml.len());
        self.out
    }
}

/// Replace the edited cells of a worksheet, keeping every other byte.
///
/// Existing cells keep their style index; missing cells and rows are
/// inserted in sheet order. Text is written as inline strings so the shared
/// string table stays untouched.
fn patch_sheet_xml(xml: &str, edits: &CellEdits) -> Result<String> {
    let mut rows: RowEdits<'_> = BTreeMap::new();
    for ((row, col), value) in edits {
        let Ok(row) = u32::try_from(row + 1) else {
            continue;
        };
        rows.entry(row).or_default().insert(*col, value);
    }

    let mut patch = SheetPatch {
        xml,
        out: String::with_capacity(xml.len() + 256),
        copied: 0,
    };
    let mut reader = Reader::from_str(xml);
    let mut row_number = 0u32;
    let mut row_cells: BTreeMap<usize, &CellValue> = BTreeMap::new();
    let mut next_col = 0usize;
    let mut replacing_cell = false;

    loop {
        let start = position(&reader);
        let event = reader.read_event()?;
        let end = position(&reader);

        match event {
            Event::Eof => break,
            Event::End(e) if replacing_cell => {
                if e.local_name().as_ref() == b"c" {
                    patch.skip_to(end);
                    replacing_cell = false;
                }
            }
            _ if replacing_cell => {}
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                patch.copy_to(start);
                patch.out.push_str("<sheetData>");
                patch.new_rows(std::mem::take(&mut rows));
                patch.out.push_str("</sheetData>");
                patch.skip_to(end);
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                patch.copy_to(start);
                patch.new_rows(std::mem::take(&mut rows));
            }
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                row_number = attribute(&e, b"r")
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(row_number + 1);
                patch.copy_to(start);
                patch.new_rows(take_before(&mut rows, &row_number));
                row_cells = rows.remove(&row_number).unwrap_or_default();
                next_col = 0;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row_number = attribute(&e, b"r")
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(row_number + 1);
                patch.copy_to(start);
                patch.new_rows(take_before(&mut rows, &row_number));
                if let Some(cells) = rows.remove(&row_number) {
                    let open_tag = xml[start..end].trim_end_matches('>').trim_end_matches('/');
                    patch.out.push_str(open_tag.trim_end());
                    patch.out.push('>');
                    patch.new_cells(row_number, &cells);
                    patch.out.push_str("</row>");
                    patch.skip_to(end);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => {
                patch.copy_to(start);
                patch.new_cells(row_number, &std::mem::take(&mut row_cells));
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let col = attribute(&e, b"r")
                    .and_then(|r| parse_cell_ref(&r))
                    .map_or(next_col, |(_, c)| c);
                next_col = col + 1;

                patch.copy_to(start);
                patch.new_cells(row_number, &take_before(&mut row_cells, &col));
                if let Some(value) = row_cells.remove(&col) {
                    let style = attribute(&e, b"s");
                    patch.out.push_str(&cell_xml(row_number, col, style.as_deref(), value));
                    // `<c .../>` ends here; `<c ...>` ends at its closing tag
                    if xml[start..end].ends_with("/>") {
                        patch.skip_to(end);
                    } else {
                        replacing_cell = true;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(patch.finish())
}
