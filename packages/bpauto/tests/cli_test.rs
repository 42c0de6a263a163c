//! CLI exit codes and fatal configuration errors.
//!
//! None of these runs reach a registry source: they fail, or finish, before
//! the first search.

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

/// Command running in an empty directory without inherited credentials.
fn bpauto(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("bpauto");
    cmd.current_dir(dir)
        .env_remove("NORTHDATA_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

/// Temp dir holding a CSV partner sheet with the given data rows.
fn partner_csv(rows: &[&str]) -> (TempDir, String) {
    let dir = tempdir().unwrap();
    let mut content = String::from("Lieferant;Kunde;Name 1\n;;Name\n");
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    let path = dir.path().join("partner.csv");
    fs::write(&path, content).unwrap();
    (dir, path.display().to_string())
}

#[test]
fn test_no_subcommand_is_usage_error() {
    let dir = tempdir().unwrap();
    bpauto(dir.path()).assert().failure();
}

#[test]
fn test_single_with_blank_keywords_exits_1() {
    let dir = tempdir().unwrap();
    bpauto(dir.path())
        .args(["single", "-s", "   "])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Missing search keywords"));
}

#[test]
fn test_api_source_without_key_exits_1() {
    let dir = tempdir().unwrap();
    bpauto(dir.path())
        .args(["single", "-s", "ACME GMBH", "--source", "api"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("NORTHDATA_API_KEY"));
}

#[test]
fn test_missing_workbook_exits_1() {
    let dir = tempdir().unwrap();
    bpauto(dir.path())
        .args(["batch", "--excel", "missing.csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_macro_workbook_is_rejected() {
    let dir = tempdir().unwrap();
    bpauto(dir.path())
        .args(["batch", "--excel", "partner.xlsm"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unsupported spreadsheet format"));
}

#[test]
fn test_bad_mapping_exits_1_before_any_row() {
    let (dir, csv) = partner_csv(&[";;ACME GMBH"]);
    fs::write(dir.path().join("mapping.yaml"), "city: \"1A\"\n").unwrap();

    bpauto(dir.path())
        .args(["batch", "--excel", &csv, "--mapping", "mapping.yaml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid column '1A' for city"));

    let content = fs::read_to_string(&csv).unwrap();
    assert_eq!(content, "Lieferant;Kunde;Name 1\n;;Name\n;;ACME GMBH\n");
}

#[test]
fn test_inverted_row_range_exits_1() {
    let (dir, csv) = partner_csv(&[";;ACME GMBH"]);
    bpauto(dir.path())
        .args(["batch", "--excel", &csv, "--start", "10", "--end", "5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid row range"));
}

#[test]
fn test_unknown_sheet_exits_1() {
    let (dir, csv) = partner_csv(&[";;ACME GMBH"]);
    bpauto(dir.path())
        .args(["batch", "--excel", &csv, "--sheet", "Tabelle9"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Sheet 'Tabelle9' not found"));
}

#[test]
fn test_sheet_without_names_exits_0() {
    let (dir, csv) = partner_csv(&[]);
    bpauto(dir.path())
        .args(["batch", "--excel", &csv])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do"));
}

#[test]
fn test_single_row_requires_excel() {
    let dir = tempdir().unwrap();
    bpauto(dir.path())
        .args(["single", "-s", "ACME GMBH", "--row", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--excel"));
}
