//! Batch and single-shot drivers.
//!
//! The driver owns the loop: read a row, resolve it, reconcile the outcome
//! and write the update back, one row at a time in ascending order. Per-row
//! problems become the row's status. Only configuration and authentication
//! errors end a run, and even then the rows finished so far are persisted.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::config::{validate_row_range, COOLDOWN_AFTER_ERRORS, DEFAULT_COOLDOWN_SECS};
use crate::error::{BpError, Result};
use crate::input::criteria_for_row;
use crate::reconcile::Reconciler;
use crate::resolve::Resolver;
use crate::store::RowStore;
use crate::types::{ResolutionOutcome, RowState, RowUpdate, SearchCriteria, SearchMode};

/// Status prefix for rows skipped because of their country.
pub const STATUS_SKIPPED_COUNTRY: &str = "Skipped: country";

/// Country code the commercial register covers.
const HOME_COUNTRY: &str = "DE";

/// Batch settings.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: SearchMode,
    /// Persist the store after every row instead of once at the end.
    pub persist_every_row: bool,
    /// Skip rows whose country is set to something other than `DE`.
    pub home_country_only: bool,
    /// Pause after [`COOLDOWN_AFTER_ERRORS`] consecutive source errors.
    pub cooldown: Duration,
    /// File that collects rows needing human review.
    pub review_log: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            persist_every_row: false,
            home_country_only: false,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            review_log: None,
        }
    }
}

/// Per-outcome row counts of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub unique: usize,
    /// Unique rows whose change flag was set.
    pub changed: usize,
    pub ambiguous: usize,
    pub not_found: usize,
    pub unexpected_format: usize,
    pub source_errors: usize,
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &ResolutionOutcome, update: &RowUpdate) {
        self.processed += 1;
        match outcome {
            ResolutionOutcome::Unique { .. } => {
                self.unique += 1;
                if update.change_flag == Some(true) {
                    self.changed += 1;
                }
            }
            ResolutionOutcome::Ambiguous { .. } => self.ambiguous += 1,
            ResolutionOutcome::NotFound => self.not_found += 1,
            ResolutionOutcome::ExtractionFailed { .. } => self.unexpected_format += 1,
            ResolutionOutcome::SourceError { .. } => self.source_errors += 1,
        }
    }
}

/// Append-only list of rows a human should look at.
#[derive(Debug, Clone)]
pub struct ReviewLog {
    path: PathBuf,
}

impl ReviewLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line: row, search keywords, outcome.
    pub fn append(&self, row: u32, keywords: &str, outcome: &ResolutionOutcome) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "row {row}\t{keywords}\t{}", outcome.label())?;
        Ok(())
    }
}

/// Runs resolution and reconciliation over a range of rows.
pub struct BatchRunner<'s> {
    resolver: Resolver<'s>,
    reconciler: Reconciler,
    options: BatchOptions,
    progress: ProgressBar,
}

impl<'s> BatchRunner<'s> {
    pub fn new(resolver: Resolver<'s>, reconciler: Reconciler, options: BatchOptions) -> Self {
        Self {
            resolver,
            reconciler,
            options,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on `progress`; its length is set by [`Self::run`].
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Process rows `start..=end` (1-based, inclusive).
    ///
    /// Rows without a name are passed over without a status. The store is
    /// persisted at the end, after every row with `persist_every_row`, and
    /// before an error is returned.
    ///
    /// # Errors
    /// Invalid row range, store I/O failures and rejected credentials.
    pub fn run(&mut self, store: &mut dyn RowStore, start: u32, end: u32) -> Result<BatchSummary> {
        validate_row_range(start, end)?;
        self.progress.set_length(u64::from(end - start + 1));

        let result = self.process_rows(store, start, end);
        self.progress.finish_and_clear();

        match result {
            Ok(summary) => {
                store.persist()?;
                tracing::info!(
                    processed = summary.processed,
                    unique = summary.unique,
                    changed = summary.changed,
                    "Batch finished"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(persist_err) = store.persist() {
                    tracing::error!(error = %persist_err, "Could not persist finished rows");
                }
                Err(e)
            }
        }
    }

    fn process_rows(
        &mut self,
        store: &mut dyn RowStore,
        start: u32,
        end: u32,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let mut consecutive_errors = 0u32;

        for index in start..=end {
            self.progress.inc(1);
            let state = store.read_row(index)?;

            let has_name = state
                .identifiers
                .name_parts
                .first()
                .is_some_and(|n| !n.trim().is_empty());
            if !has_name {
                tracing::debug!(row = index, "No name, skipping row");
                continue;
            }

            if let Some(country) = self.foreign_country(&state) {
                tracing::info!(row = index, country = %country, "Row outside the register's country, skipping");
                store.write_row(
                    index,
                    &RowUpdate::status_only(format!("{STATUS_SKIPPED_COUNTRY} {country}")),
                )?;
                self.persist_row(store)?;
                summary.skipped += 1;
                continue;
            }

            let criteria = criteria_for_row(&state, self.options.mode)?;
            self.progress.set_message(criteria.keywords().to_string());

            let outcome = self
                .resolver
                .resolve_for(&criteria, state.identifiers.external_keys.first().map(String::as_str))?;
            let update = self.reconciler.reconcile(&outcome, &state);

            tracing::info!(row = index, keywords = criteria.keywords(), outcome = %outcome.label(), "Row resolved");
            store.write_row(index, &update)?;
            self.persist_row(store)?;
            summary.record(&outcome, &update);

            if outcome.needs_review() {
                self.note_for_review(index, &criteria, &outcome);
            }

            if matches!(outcome, ResolutionOutcome::SourceError { .. }) {
                consecutive_errors += 1;
                if consecutive_errors >= COOLDOWN_AFTER_ERRORS {
                    self.cool_down(consecutive_errors);
                    consecutive_errors = 0;
                }
            } else {
                consecutive_errors = 0;
            }
        }

        Ok(summary)
    }

    fn foreign_country(&self, state: &RowState) -> Option<String> {
        if !self.options.home_country_only {
            return None;
        }
        state
            .identifiers
            .country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(HOME_COUNTRY))
            .map(str::to_string)
    }

    fn persist_row(&self, store: &mut dyn RowStore) -> Result<()> {
        if self.options.persist_every_row {
            store.persist()?;
        }
        Ok(())
    }

    fn note_for_review(&self, index: u32, criteria: &SearchCriteria, outcome: &ResolutionOutcome) {
        let Some(path) = &self.options.review_log else {
            return;
        };
        if let Err(e) = ReviewLog::new(path).append(index, criteria.keywords(), outcome) {
            tracing::warn!(error = %e, path = %path.display(), "Could not write review log");
        }
    }

    fn cool_down(&self, errors: u32) {
        if self.options.cooldown.is_zero() {
            return;
        }
        tracing::warn!(
            errors,
            secs = self.options.cooldown.as_secs(),
            "Source keeps failing, pausing before the next row"
        );
        self.progress
            .set_message(format!("cooling down for {}s", self.options.cooldown.as_secs()));
        thread::sleep(self.options.cooldown);
    }
}

/// Row a single-shot resolution writes to.
pub struct SingleTarget<'a> {
    pub store: &'a mut dyn RowStore,
    pub row: u32,
    /// Supplier or customer number the row must carry.
    pub external_key: Option<String>,
}

/// What a single-shot run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleResult {
    pub outcome: ResolutionOutcome,
    /// The update written to the target row, if there was one.
    pub update: Option<RowUpdate>,
}

/// Resolve one set of criteria, optionally reconciling into a target row.
///
/// With a target and an external key, the row must carry that key in one
/// of its key columns; otherwise nothing is searched or written.
///
/// # Errors
/// `BpError::IdentityMismatch` for a row that belongs to another partner,
/// plus everything [`Resolver::resolve`] and the store can return.
pub fn run_single(
    resolver: &mut Resolver<'_>,
    reconciler: &Reconciler,
    criteria: &SearchCriteria,
    target: Option<SingleTarget<'_>>,
) -> Result<SingleResult> {
    let Some(target) = target else {
        let outcome = resolver.resolve(criteria)?;
        return Ok(SingleResult {
            outcome,
            update: None,
        });
    };

    let state = target.store.read_row(target.row)?;
    if let Some(key) = &target.external_key {
        check_identity(&state, key)?;
    }

    let key = target
        .external_key
        .as_deref()
        .or_else(|| state.identifiers.external_keys.first().map(String::as_str));
    let outcome = resolver.resolve_for(criteria, key)?;
    let update = reconciler.reconcile(&outcome, &state);

    target.store.write_row(target.row, &update)?;
    target.store.persist()?;

    Ok(SingleResult {
        outcome,
        update: Some(update),
    })
}

/// Check that a row carries the given supplier or customer number.
pub fn check_identity(state: &RowState, key: &str) -> Result<()> {
    let key = key.trim();
    if state.identifiers.external_keys.iter().any(|k| k.trim() == key) {
        return Ok(());
    }
    let found = if state.identifiers.external_keys.is_empty() {
        "none".to_string()
    } else {
        state.identifiers.external_keys.join(", ")
    };
    Err(BpError::IdentityMismatch {
        row: state.index,
        key: key.to_string(),
        found,
    })
}
