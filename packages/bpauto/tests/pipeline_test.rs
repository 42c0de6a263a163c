//! End-to-end tests for the resolution and reconciliation pipeline.
//!
//! A scripted source stands in for the register and an in-memory sheet for
//! the partner workbook, so every scenario runs offline and without delays.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use bpauto::batch::{run_single, BatchOptions, BatchRunner, SingleTarget};
use bpauto::config::{column_index, ColumnMapping};
use bpauto::error::BpError;
use bpauto::reconcile::Reconciler;
use bpauto::resolve::{DocumentArchive, Resolver, RetryPolicy};
use bpauto::source::{RawContent, Source, SourceFailure};
use bpauto::store::{Grid, SheetStore};
use bpauto::types::{Candidate, ResolutionOutcome, SearchCriteria};

/// Load fixture file content.
fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {}: {}", path.display(), e))
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

/// Source that replays scripted search results and counts calls.
#[derive(Default)]
struct ScriptedSource {
    searches: VecDeque<Result<Vec<Candidate>, SourceFailure>>,
    document: Option<RawContent>,
    search_calls: usize,
    fetch_calls: usize,
    last_criteria: Option<SearchCriteria>,
}

impl ScriptedSource {
    fn returning(candidates: usize) -> Self {
        let mut source = Self::default();
        source.push_candidates(candidates);
        source
    }

    fn push_candidates(&mut self, count: usize) {
        let candidates = (0..count)
            .map(|i| Candidate::new(format!("ACME GMBH {i}"), i.to_string()).at_position(i))
            .collect();
        self.searches.push_back(Ok(candidates));
    }

    fn push_failure(&mut self, failure: SourceFailure) {
        self.searches.push_back(Err(failure));
    }

    fn with_document(mut self, text: &str) -> Self {
        self.document = Some(RawContent::text(text));
        self
    }
}

impl Source for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Candidate>, SourceFailure> {
        self.search_calls += 1;
        self.last_criteria = Some(criteria.clone());
        self.searches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn fetch_document(&mut self, _candidate: &Candidate) -> Result<RawContent, SourceFailure> {
        self.fetch_calls += 1;
        self.document
            .clone()
            .ok_or_else(|| SourceFailure::Terminal("no document".into()))
    }
}

/// Sheet with two header rows and one data row per entry of `rows`.
///
/// Each entry lists `(column letter, value)` pairs.
fn sheet(rows: &[&[(&str, &str)]]) -> Grid {
    let mut grid = Grid::new("Tabelle1");
    grid.set_text(0, 2, "Name 1");
    grid.set_text(1, 2, "Name");
    for (i, cells) in rows.iter().enumerate() {
        for (column, value) in cells.iter() {
            grid.set_text(i + 2, column_index("test", column).unwrap(), value);
        }
    }
    grid
}

fn store(grid: Grid) -> SheetStore {
    SheetStore::in_memory(grid, &ColumnMapping::default()).unwrap()
}

fn cell(store: &SheetStore, row: u32, column: &str) -> String {
    store
        .grid()
        .text(row as usize - 1, column_index("test", column).unwrap())
}

fn batch_options() -> BatchOptions {
    BatchOptions {
        cooldown: Duration::ZERO,
        ..BatchOptions::default()
    }
}

/// Run a batch over `start..=end` with test defaults.
fn run_batch(
    source: &mut ScriptedSource,
    store: &mut SheetStore,
    options: BatchOptions,
    start: u32,
    end: u32,
) -> bpauto::Result<bpauto::batch::BatchSummary> {
    let resolver = Resolver::new(source)
        .with_policy(RetryPolicy::without_delay())
        .with_date(today());
    BatchRunner::new(resolver, Reconciler::new(today()), options).run(store, start, end)
}

const ACME: &[(&str, &str)] = &[("A", "4711"), ("C", "ACME GMBH"), ("J", "DE")];

#[test]
fn test_scenario_a_not_found_only_sets_status() {
    let mut source = ScriptedSource::returning(0);
    let mut store = store(sheet(&[ACME]));
    let before = store.grid().clone();

    let summary = run_batch(&mut source, &mut store, batch_options(), 3, 3).unwrap();

    assert_eq!(summary.not_found, 1);
    assert_eq!(cell(&store, 3, "W"), "0");

    let mut expected = before;
    expected.set_text(2, column_index("status", "W").unwrap(), "0");
    assert_eq!(store.grid(), &expected);
    assert_eq!(source.fetch_calls, 0);
}

#[test]
fn test_scenario_b_unique_updates_fields_and_flags() {
    let mut source = ScriptedSource::returning(1).with_document(&load_fixture("hrb_extract.txt"));
    let mut store = store(sheet(&[&[
        ("A", "4711"),
        ("C", "ACME GMBH"),
        ("U", "99999"),
        ("V", "HRA"),
        ("Z", "Berlin"),
        ("W", "3"),
    ]]));

    let criteria = SearchCriteria::new("ACME GMBH")
        .unwrap()
        .with_register_number("12345");
    let mut resolver = Resolver::new(&mut source)
        .with_policy(RetryPolicy::without_delay())
        .with_date(today());
    let result = run_single(
        &mut resolver,
        &Reconciler::new(today()),
        &criteria,
        Some(SingleTarget {
            store: &mut store,
            row: 3,
            external_key: None,
        }),
    )
    .unwrap();

    let ResolutionOutcome::Unique { fields, .. } = &result.outcome else {
        panic!("expected a unique outcome, got {:?}", result.outcome);
    };
    assert_eq!(fields.register_type.as_deref(), Some("HRB"));
    assert_eq!(fields.register_number.as_deref(), Some("12345"));
    assert_eq!(fields.city.as_deref(), Some("München"));

    assert_eq!(cell(&store, 3, "V"), "HRB");
    assert_eq!(cell(&store, 3, "U"), "12345");
    assert_eq!(cell(&store, 3, "Z"), "München");
    assert_eq!(cell(&store, 3, "Q"), "yes");
    assert_eq!(cell(&store, 3, "W"), "");
    assert_eq!(cell(&store, 3, "S"), "16.10.2026");
    assert_eq!(store.persist_count(), 1);

    assert_eq!(
        source
            .last_criteria
            .as_ref()
            .and_then(|c| c.register_number.as_deref()),
        Some("12345")
    );
}

#[test]
fn test_scenario_c_ambiguous_sets_count() {
    let mut source = ScriptedSource::returning(3);
    let mut store = store(sheet(&[&[("C", "ACME GMBH"), ("U", "12345"), ("Z", "Berlin")]]));
    let before = store.grid().clone();

    let summary = run_batch(&mut source, &mut store, batch_options(), 3, 3).unwrap();

    assert_eq!(summary.ambiguous, 1);
    assert_eq!(cell(&store, 3, "W"), "3");
    assert_eq!(cell(&store, 3, "U"), "12345");
    assert_eq!(cell(&store, 3, "Z"), "Berlin");

    let mut expected = before;
    expected.set_text(2, column_index("status", "W").unwrap(), "3");
    assert_eq!(store.grid(), &expected);
    assert_eq!(source.fetch_calls, 0);
}

#[test]
fn test_scenario_d_unknown_layout_keeps_document() {
    let dir = tempdir().unwrap();
    let document = load_fixture("unknown_document.txt");
    let mut source = ScriptedSource::returning(1).with_document(&document);
    let mut store = store(sheet(&[ACME]));

    {
        let resolver = Resolver::new(&mut source)
            .with_policy(RetryPolicy::without_delay())
            .with_archive(DocumentArchive::new(dir.path()).unwrap())
            .with_date(today());
        let options = BatchOptions {
            review_log: Some(dir.path().join("review.txt")),
            ..batch_options()
        };
        BatchRunner::new(resolver, Reconciler::new(today()), options)
            .run(&mut store, 3, 3)
            .unwrap();
    }

    assert_eq!(cell(&store, 3, "W"), "Unexpected format");
    assert_eq!(cell(&store, 3, "Q"), "");

    let archived = cell(&store, 3, "P");
    assert!(archived.ends_with("4711_ACME GMBH 0_2026-10-16.txt"), "{archived}");
    assert_eq!(fs::read_to_string(&archived).unwrap(), document);

    let review = fs::read_to_string(dir.path().join("review.txt")).unwrap();
    assert_eq!(review, "row 3\tACME GMBH\tunexpected format (ACME GMBH 0)\n");
}

#[test]
fn test_transient_failures_then_success_match_immediate_success() {
    let mut flaky = ScriptedSource::default();
    flaky.push_failure(SourceFailure::Transient("timeout".into()));
    flaky.push_failure(SourceFailure::Transient("HTTP 503".into()));
    flaky.push_candidates(2);
    let mut steady = ScriptedSource::returning(2);

    let criteria = SearchCriteria::new("ACME GMBH").unwrap();
    let flaky_outcome = Resolver::new(&mut flaky)
        .with_policy(RetryPolicy::without_delay())
        .resolve(&criteria)
        .unwrap();
    let steady_outcome = Resolver::new(&mut steady)
        .with_policy(RetryPolicy::without_delay())
        .resolve(&criteria)
        .unwrap();

    assert_eq!(flaky_outcome, ResolutionOutcome::Ambiguous { count: 2 });
    assert_eq!(flaky_outcome, steady_outcome);
    assert_eq!(flaky.search_calls, 3);
    assert_eq!(steady.search_calls, 1);
}

#[test]
fn test_three_transient_failures_give_source_error_after_three_calls() {
    let mut source = ScriptedSource::default();
    for _ in 0..4 {
        source.push_failure(SourceFailure::Transient("HTTP 429".into()));
    }
    let mut store = store(sheet(&[ACME]));

    let summary = run_batch(&mut source, &mut store, batch_options(), 3, 3).unwrap();

    assert_eq!(summary.source_errors, 1);
    assert_eq!(source.search_calls, 3);
    assert_eq!(cell(&store, 3, "W"), "Source error: retries exhausted");
}

#[test]
fn test_fetch_gets_its_own_attempt_budget() {
    let mut source = ScriptedSource::default();
    source.push_failure(SourceFailure::Transient("timeout".into()));
    source.push_failure(SourceFailure::Transient("timeout".into()));
    source.push_candidates(1);

    let outcome = Resolver::new(&mut source)
        .with_policy(RetryPolicy::without_delay())
        .resolve(&SearchCriteria::new("ACME GMBH").unwrap())
        .unwrap();

    // No document scripted: the fetch is rejected and not retried
    assert!(matches!(outcome, ResolutionOutcome::SourceError { .. }));
    assert_eq!(source.search_calls, 3);
    assert_eq!(source.fetch_calls, 1);
}

#[test]
fn test_empty_name_fails_fast_without_source_calls() {
    let mut source = ScriptedSource::returning(1);
    let result = Resolver::new(&mut source).resolve(&SearchCriteria::unchecked("   "));

    assert!(matches!(result, Err(BpError::MissingKeywords)));
    assert_eq!(source.search_calls, 0);
    assert_eq!(source.fetch_calls, 0);
}

#[test]
fn test_reconciling_twice_does_not_reflag() {
    let document = load_fixture("hrb_extract.txt");
    let mut source = ScriptedSource::returning(1).with_document(&document);
    source.push_candidates(1);
    let mut store = store(sheet(&[ACME]));
    let criteria = SearchCriteria::new("ACME GMBH").unwrap();
    let reconciler = Reconciler::new(today()).with_flag_new_fields(true);

    let mut resolver = Resolver::new(&mut source).with_policy(RetryPolicy::without_delay());
    let first = run_single(
        &mut resolver,
        &reconciler,
        &criteria,
        Some(SingleTarget {
            store: &mut store,
            row: 3,
            external_key: None,
        }),
    )
    .unwrap();
    let second = run_single(
        &mut resolver,
        &reconciler,
        &criteria,
        Some(SingleTarget {
            store: &mut store,
            row: 3,
            external_key: None,
        }),
    )
    .unwrap();

    let first = first.update.unwrap();
    let second = second.update.unwrap();
    assert_eq!(first.changes.len(), 7);
    assert_eq!(first.change_flag, Some(true));
    assert!(second.changes.is_empty());
    assert_eq!(second.change_flag, None);
    assert_eq!(cell(&store, 3, "Q"), "yes");
}

#[test]
fn test_batch_continues_past_row_outcomes() {
    let mut source = ScriptedSource::returning(0);
    source.push_candidates(2);
    source.push_failure(SourceFailure::Terminal("HTTP 400".into()));
    let mut store = store(sheet(&[
        &[("C", "ACME GMBH")],
        &[("C", "")],
        &[("C", "BETA AG")],
        &[("C", "GAMMA KG")],
    ]));

    let options = BatchOptions {
        persist_every_row: true,
        ..batch_options()
    };
    let summary = run_batch(&mut source, &mut store, options, 3, 6).unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(cell(&store, 3, "W"), "0");
    assert_eq!(cell(&store, 4, "W"), "");
    assert_eq!(cell(&store, 5, "W"), "2");
    assert_eq!(cell(&store, 6, "W"), "Source error: HTTP 400");
    // One persist per processed row plus the final one
    assert_eq!(store.persist_count(), 4);
    assert_eq!(source.search_calls, 3);
}

#[test]
fn test_auth_failure_aborts_batch_and_keeps_finished_rows() {
    let mut source = ScriptedSource::returning(0);
    source.push_failure(SourceFailure::Auth("HTTP 401".into()));
    let mut store = store(sheet(&[
        &[("C", "ACME GMBH")],
        &[("C", "BETA AG")],
        &[("C", "GAMMA KG")],
    ]));

    let err = run_batch(&mut source, &mut store, batch_options(), 3, 5).unwrap_err();

    assert!(matches!(err, BpError::Authentication { .. }));
    assert_eq!(source.search_calls, 2);
    assert_eq!(cell(&store, 3, "W"), "0");
    assert_eq!(cell(&store, 4, "W"), "");
    assert_eq!(cell(&store, 5, "W"), "");
    assert_eq!(store.persist_count(), 1);
}

#[test]
fn test_foreign_rows_are_skipped_for_the_register() {
    let mut source = ScriptedSource::returning(0);
    let mut store = store(sheet(&[&[("C", "ACME GMBH"), ("J", "AT")], ACME]));

    let options = BatchOptions {
        home_country_only: true,
        ..batch_options()
    };
    let summary = run_batch(&mut source, &mut store, options, 3, 4).unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.not_found, 1);
    assert_eq!(cell(&store, 3, "W"), "Skipped: country AT");
    assert_eq!(cell(&store, 4, "W"), "0");
    assert_eq!(source.search_calls, 1);
}

#[test]
fn test_identity_guard_blocks_foreign_row() {
    let mut source = ScriptedSource::returning(1);
    let mut store = store(sheet(&[ACME]));
    let before = store.grid().clone();

    let mut resolver = Resolver::new(&mut source);
    let err = run_single(
        &mut resolver,
        &Reconciler::new(today()),
        &SearchCriteria::new("ACME GMBH").unwrap(),
        Some(SingleTarget {
            store: &mut store,
            row: 3,
            external_key: Some("900123".into()),
        }),
    )
    .unwrap_err();

    assert!(matches!(err, BpError::IdentityMismatch { row: 3, .. }));
    drop(resolver);
    assert_eq!(source.search_calls, 0);
    assert_eq!(store.grid(), &before);
    assert_eq!(store.persist_count(), 0);
}

#[test]
fn test_name_parts_are_combined_for_search() {
    let mut source = ScriptedSource::returning(0);
    let mut store = store(sheet(&[&[("C", "ACME Holding"), ("D", "GmbH"), ("E", "k.A.")]]));

    run_batch(&mut source, &mut store, batch_options(), 3, 3).unwrap();

    assert_eq!(
        source.last_criteria.as_ref().map(SearchCriteria::keywords),
        Some("ACME Holding GmbH")
    );
}
