//! Resolution of search criteria against a registry source.
//!
//! One call to [`Resolver::resolve`] yields exactly one
//! [`ResolutionOutcome`]. Source calls go through a bounded [`RetryPolicy`];
//! search and document fetch each get their own attempt budget.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use regex::Regex;

use crate::config::MAX_ATTEMPTS;
use crate::error::{BpError, Result};
use crate::extract::Extractor;
use crate::source::{RawContent, Source, SourceFailure};
use crate::types::{Candidate, ResolutionOutcome, SearchCriteria, SourceErrorKind};

/// Default delay unit between attempts; attempt `n` waits `n` units.
const DEFAULT_RETRY_DELAY_MS: u64 = 1500;

/// Highest collision suffix tried before giving up on archiving.
const MAX_ARCHIVE_SUFFIX: u32 = 999;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]+"#).expect("valid regex"));

/// Result of a call made under a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempted<T> {
    Succeeded(T),
    /// The source kept failing or rejected the request.
    Failed(SourceErrorKind),
    /// Credentials were rejected.
    AuthFailed(String),
}

/// Bounded retry over classified source failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, Duration::from_millis(DEFAULT_RETRY_DELAY_MS))
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_unit,
        }
    }

    /// Policy with the standard attempt budget and no delay.
    #[must_use]
    pub fn without_delay() -> Self {
        Self::new(MAX_ATTEMPTS, Duration::ZERO)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails non-transiently or the budget is used up.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> std::result::Result<T, SourceFailure>,
    ) -> Attempted<T> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 && !self.delay_unit.is_zero() {
                let delay = self.delay_unit * (attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
                thread::sleep(delay);
            }

            match op() {
                Ok(value) => return Attempted::Succeeded(value),
                Err(SourceFailure::Transient(message)) => {
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %message,
                        "Transient source failure"
                    );
                    last_error = message;
                }
                Err(SourceFailure::Terminal(message)) => {
                    tracing::warn!(call = label, error = %message, "Source rejected request");
                    return Attempted::Failed(SourceErrorKind::Terminal(message));
                }
                Err(SourceFailure::Auth(message)) => return Attempted::AuthFailed(message),
            }
        }

        Attempted::Failed(SourceErrorKind::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Directory where fetched documents are kept.
#[derive(Debug, Clone)]
pub struct DocumentArchive {
    dir: PathBuf,
}

impl DocumentArchive {
    /// Create the archive, creating its directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a document as `<key>_<company>_<date>.<ext>`.
    ///
    /// The key prefix is omitted without a key. Existing files are never
    /// overwritten: a `-1`, `-2`, ... suffix is added instead.
    pub fn store(
        &self,
        external_key: Option<&str>,
        company: &str,
        date: NaiveDate,
        content: &RawContent,
    ) -> Result<PathBuf> {
        let prefix = external_key
            .map(sanitize_filename)
            .filter(|k| !k.is_empty())
            .map(|k| format!("{k}_"))
            .unwrap_or_default();
        let stem = format!("{prefix}{}_{}", sanitize_filename(company), date.format("%Y-%m-%d"));
        let ext = content.archive_extension();
        let bytes = content.archive_bytes();

        for suffix in 0..=MAX_ARCHIVE_SUFFIX {
            let name = match suffix {
                0 => format!("{stem}.{ext}"),
                n => format!("{stem}-{n}.{ext}"),
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&bytes)?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(BpError::Config(format!(
            "too many archived documents named {stem}.{ext} in {}",
            self.dir.display()
        )))
    }
}

/// Make a company name safe to use in a file name.
///
/// # Examples
/// ```
/// use bpauto::resolve::sanitize_filename;
///
/// assert_eq!(sanitize_filename(" A/B: C "), "A_B_ C");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(name.trim(), "_").into_owned()
}

/// Drives a source through one resolution.
pub struct Resolver<'s> {
    source: &'s mut dyn Source,
    extractor: Extractor,
    policy: RetryPolicy,
    archive: Option<DocumentArchive>,
    today: NaiveDate,
}

impl<'s> Resolver<'s> {
    pub fn new(source: &'s mut dyn Source) -> Self {
        Self {
            source,
            extractor: Extractor::new(),
            policy: RetryPolicy::default(),
            archive: None,
            today: Local::now().date_naive(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Keep every fetched document in `archive`.
    #[must_use]
    pub fn with_archive(mut self, archive: DocumentArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Date used in archived file names.
    #[must_use]
    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Resolve criteria into exactly one outcome.
    ///
    /// # Errors
    /// `BpError::MissingKeywords` for blank keywords (the source is not
    /// called) and `BpError::Authentication` when the source rejects the
    /// credentials. Everything else is an outcome.
    pub fn resolve(&mut self, criteria: &SearchCriteria) -> Result<ResolutionOutcome> {
        self.resolve_for(criteria, None)
    }

    /// Like [`Self::resolve`], naming archived documents after `external_key`.
    pub fn resolve_for(
        &mut self,
        criteria: &SearchCriteria,
        external_key: Option<&str>,
    ) -> Result<ResolutionOutcome> {
        if criteria.keywords().trim().is_empty() {
            return Err(BpError::MissingKeywords);
        }

        let source_name = self.source.name();
        let source = &mut *self.source;
        let candidates = match self.policy.run("search", || source.search(criteria)) {
            Attempted::Succeeded(candidates) => candidates,
            Attempted::Failed(kind) => return Ok(ResolutionOutcome::SourceError { kind }),
            Attempted::AuthFailed(message) => return Err(auth_error(source_name, message)),
        };

        let candidate = match candidates.as_slice() {
            [] => return Ok(ResolutionOutcome::NotFound),
            [single] => single.clone(),
            many => return Ok(ResolutionOutcome::Ambiguous { count: many.len() }),
        };
        tracing::debug!(name = %candidate.name, "Unique candidate");

        let content = match self
            .policy
            .run("fetch_document", || source.fetch_document(&candidate))
        {
            Attempted::Succeeded(content) => content,
            Attempted::Failed(kind) => return Ok(ResolutionOutcome::SourceError { kind }),
            Attempted::AuthFailed(message) => return Err(auth_error(source_name, message)),
        };

        let document = self.archive_document(external_key, &candidate, &content);

        Ok(match self.extractor.extract(&content) {
            Ok(fields) => ResolutionOutcome::Unique {
                candidate,
                fields,
                document,
            },
            Err(err) => {
                tracing::warn!(name = %candidate.name, content_len = err.content.len(), "{err}");
                ResolutionOutcome::ExtractionFailed {
                    candidate,
                    reason: err.to_string(),
                    document,
                }
            }
        })
    }

    fn archive_document(
        &self,
        external_key: Option<&str>,
        candidate: &Candidate,
        content: &RawContent,
    ) -> Option<PathBuf> {
        let archive = self.archive.as_ref()?;
        match archive.store(external_key, &candidate.name, self.today, content) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "Archived document");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, name = %candidate.name, "Failed to archive document");
                None
            }
        }
    }
}

fn auth_error(source_name: &str, message: String) -> BpError {
    BpError::Authentication {
        source_name: source_name.to_string(),
        message,
    }
}
