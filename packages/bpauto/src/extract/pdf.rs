//! PDF to text via poppler's `pdftotext`.

use std::io::{ErrorKind, Write};
use std::process::Command;

use crate::error::{BpError, Result};

/// Extract the text of a PDF document.
///
/// Runs `pdftotext -layout <file> -` on a temporary copy of the bytes and
/// captures stdout. `-layout` keeps labels and values of a register extract
/// on the same line.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String> {
    let mut file = tempfile::Builder::new()
        .prefix("bpauto-")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;

    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg(file.path())
        .arg("-")
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => BpError::PdfText("pdftotext not installed (poppler-utils)".to_string()),
            _ => BpError::PdfText(format!("failed to run pdftotext: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BpError::PdfText(format!(
            "pdftotext failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
