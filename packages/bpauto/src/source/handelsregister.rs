//! Source driving the handelsregister.de web UI over an HTTP session.
//!
//! The register is a JSF application: every form post has to carry the
//! `javax.faces.ViewState` of the page it was rendered from, and the result
//! table rows (`tr[data-ri]`) hold the links to the register documents.
//! Anything that does not look like the expected page is treated as UI drift
//! and reported as a transient failure.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};

use super::{RawContent, Source, SourceFailure};
use crate::config::{HANDELSREGISTER_URL, UI_SEARCHES_PER_HOUR, UI_TIMEOUT_SECS};
use crate::error::Result;
use crate::extract::pdf_to_text;
use crate::http::{create_client, read_bytes, read_text, send};
use crate::types::{Candidate, SearchCriteria};

/// The register only looks at the first few words of a keyword search.
const MAX_KEYWORD_WORDS: usize = 5;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static VIEW_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="javax\.faces\.ViewState"[^>]*?value="([^"]*)""#).expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static RESULT_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tr[^>]*\bdata-ri="(\d+)"[^>]*>(.*?)</tr>"#).expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<td[^>]*>(.*?)</td>").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static NO_RESULTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Keine\s+(Treffer|Daten|Ergebnisse)|ui-datatable-empty-message")
        .expect("valid regex")
});

/// `onclick` of the current-printout ("AD") document link.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static AD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"onclick="([^"]*Dokumentart\.AD[^"]*)""#).expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SUBMIT_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']+)'\s*:\s*'([^']*)'").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SUBMIT_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"submit\('([^']+)'").expect("valid regex"));

/// Settings for the register UI source.
#[derive(Debug, Clone)]
pub struct HandelsregisterConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Send the postal code with the search and drop result rows whose
    /// address lacks it. Off means the postal code is ignored.
    pub filter_postal_code: bool,
    /// Keep every fetched page here for inspection.
    pub page_dir: Option<PathBuf>,
    pub searches_per_hour: u32,
}

impl Default for HandelsregisterConfig {
    fn default() -> Self {
        Self {
            base_url: HANDELSREGISTER_URL.to_string(),
            timeout: Duration::from_secs(UI_TIMEOUT_SECS),
            filter_postal_code: false,
            page_dir: None,
            searches_per_hour: UI_SEARCHES_PER_HOUR,
        }
    }
}

/// Rolling-window limit on searches.
#[derive(Debug, Clone)]
pub struct HourlyQuota {
    limit: usize,
    window: Duration,
    issued: VecDeque<Instant>,
}

impl HourlyQuota {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            issued: VecDeque::new(),
        }
    }

    /// How long to wait at `now` before the next search may be issued.
    #[must_use]
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.issued.len() < self.limit {
            return None;
        }
        let oldest = self.issued.front()?;
        let elapsed = now.saturating_duration_since(*oldest);
        (elapsed < self.window).then(|| self.window - elapsed)
    }

    /// Record a search issued at `now`, forgetting those outside the window.
    pub fn record(&mut self, now: Instant) {
        while let Some(oldest) = self.issued.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
        self.issued.push_back(now);
    }

    /// Block until a search may be issued, then record it.
    pub fn acquire(&mut self) {
        if let Some(wait) = self.wait_time(Instant::now()) {
            tracing::warn!(
                wait_secs = wait.as_secs(),
                limit = self.limit,
                "Hourly search limit reached, waiting"
            );
            thread::sleep(wait);
        }
        self.record(Instant::now());
    }
}

/// One row of the result table.
#[derive(Debug, Clone, PartialEq)]
struct ResultRow {
    data_ri: String,
    cells: Vec<String>,
    /// Form id and submit parameters of the AD link.
    document_form: Option<(String, Vec<(String, String)>)>,
}

/// The result page of the last search.
#[derive(Debug)]
struct ResultPage {
    url: String,
    view_state: String,
    rows: Vec<ResultRow>,
}

/// Source backed by the register's web UI.
pub struct HandelsregisterSource {
    http: Client,
    config: HandelsregisterConfig,
    quota: HourlyQuota,
    session_open: bool,
    last_page: Option<ResultPage>,
    saved_pages: usize,
}

impl HandelsregisterSource {
    pub fn new(config: HandelsregisterConfig) -> Result<Self> {
        let http = create_client(config.timeout, config.timeout, true)?;
        if let Some(dir) = &config.page_dir {
            std::fs::create_dir_all(dir)?;
        }
        let quota = HourlyQuota::new(config.searches_per_hour, Duration::from_secs(3600));
        Ok(Self {
            http,
            config,
            quota,
            session_open: false,
            last_page: None,
            saved_pages: 0,
        })
    }

    fn url(&self, page: &str) -> String {
        format!("{}/{page}", self.config.base_url)
    }

    fn get_page(&mut self, page: &str) -> std::result::Result<String, SourceFailure> {
        let response = send_anonymous(self.http.get(self.url(page)))?;
        if response.status().as_u16() == 404 {
            return Err(SourceFailure::Transient(format!("page {page} not found")));
        }
        let body = read_text(response)?;
        self.keep_page(page, body.as_bytes());
        Ok(body)
    }

    fn open_session(&mut self) -> std::result::Result<(), SourceFailure> {
        if !self.session_open {
            self.get_page("welcome.xhtml")?;
            self.session_open = true;
            tracing::debug!("Opened register session");
        }
        Ok(())
    }

    fn keep_page(&mut self, name: &str, body: &[u8]) {
        let Some(dir) = &self.config.page_dir else {
            return;
        };
        self.saved_pages += 1;
        let path = dir.join(format!("{:04}_{name}", self.saved_pages));
        if let Err(e) = std::fs::write(&path, body) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to keep fetched page");
        }
    }
}

impl Source for HandelsregisterSource {
    fn name(&self) -> &'static str {
        "Handelsregister"
    }

    fn search(&mut self, criteria: &SearchCriteria) -> std::result::Result<Vec<Candidate>, SourceFailure> {
        self.last_page = None;
        self.open_session()?;

        let form_page = self.get_page("erweitertesuche.xhtml")?;
        let view_state = parse_view_state(&form_page).ok_or_else(|| {
            SourceFailure::Transient("search form not found (UI changed?)".to_string())
        })?;

        let keywords = limit_keywords(criteria.keywords());
        // The postal code only narrows the search when the filter is switched on.
        let postal_code = criteria
            .postal_code
            .clone()
            .filter(|_| self.config.filter_postal_code)
            .unwrap_or_default();
        let form = [
            ("form", "form".to_string()),
            ("form:schlagwoerter", keywords.clone()),
            ("form:schlagwortOptionen", criteria.mode.form_value().to_string()),
            (
                "form:registerNummer",
                criteria.register_number.clone().unwrap_or_default(),
            ),
            ("form:postleitzahl", postal_code),
            ("form:btnSuche", String::new()),
            ("javax.faces.ViewState", view_state),
        ];

        self.quota.acquire();
        tracing::info!(keywords = %keywords, mode = ?criteria.mode, "Searching register");

        let response = send_anonymous(self.http.post(self.url("erweitertesuche.xhtml")).form(&form))?;
        let url = response.url().to_string();
        let body = read_text(response)?;
        self.keep_page("sucheErgebnisse.xhtml", body.as_bytes());

        let page = parse_result_page(&url, &body)?;
        let mut rows = page.rows.clone();

        if self.config.filter_postal_code {
            if let Some(plz) = criteria.postal_code.as_deref() {
                let before = rows.len();
                rows.retain(|r| looks_like_same_zip(&r.address(), plz));
                if rows.len() < before {
                    tracing::debug!(dropped = before - rows.len(), plz, "Dropped rows outside postal code");
                }
            }
        }

        let candidates = rows.iter().map(ResultRow::to_candidate).collect();
        self.last_page = Some(ResultPage { rows, ..page });
        Ok(candidates)
    }

    fn fetch_document(&mut self, candidate: &Candidate) -> std::result::Result<RawContent, SourceFailure> {
        let page = self
            .last_page
            .as_ref()
            .ok_or_else(|| SourceFailure::Terminal("no search results to fetch from".to_string()))?;
        let row = page
            .rows
            .iter()
            .find(|r| r.data_ri == candidate.handle)
            .ok_or_else(|| {
                SourceFailure::Terminal(format!("candidate '{}' not in result table", candidate.name))
            })?;
        let (form_id, params) = row.document_form.clone().ok_or_else(|| {
            SourceFailure::Terminal(format!("no current printout offered for '{}'", candidate.name))
        })?;

        let mut form = vec![
            (form_id.clone(), form_id),
            ("javax.faces.ViewState".to_string(), page.view_state.clone()),
        ];
        form.extend(params);

        let request = self.http.post(page.url.clone()).form(&form);
        let bytes = read_bytes(send_anonymous(request)?)?;
        self.keep_page("document.pdf", &bytes);

        if !bytes.starts_with(b"%PDF") {
            return Err(SourceFailure::Transient(
                "document download did not return a PDF".to_string(),
            ));
        }

        let text = pdf_to_text(&bytes).map_err(|e| SourceFailure::Terminal(e.to_string()))?;
        Ok(RawContent::Text {
            text,
            pdf: Some(bytes),
        })
    }
}

impl ResultRow {
    fn cell(&self, idx: usize, fallback: usize) -> Option<String> {
        self.cells
            .get(idx)
            .filter(|c| !c.is_empty())
            .or_else(|| self.cells.get(fallback).filter(|c| !c.is_empty()))
            .cloned()
    }

    fn address(&self) -> String {
        self.cell(3, 2).unwrap_or_default()
    }

    fn to_candidate(&self) -> Candidate {
        let mut candidate = Candidate::new(self.cell(2, 1).unwrap_or_default(), self.data_ri.clone());
        candidate.position = self.data_ri.parse().ok();
        candidate.court = self.cell(1, 0);
        candidate.registered_office = self.cell(3, 2);
        candidate.address = candidate.registered_office.clone();
        candidate
    }
}

/// Send a request to the public register.
///
/// The register takes no credentials, so 401/403 means the client is being
/// turned away for now and is retried like any other transient failure.
fn send_anonymous(request: RequestBuilder) -> std::result::Result<Response, SourceFailure> {
    send(request).map_err(|failure| match failure {
        SourceFailure::Auth(message) => {
            SourceFailure::Transient(format!("access refused by register ({message})"))
        }
        other => other,
    })
}

/// Keep the first words of the keywords, splitting on blanks and hyphens.
fn limit_keywords(keywords: &str) -> String {
    keywords
        .split([' ', '-'])
        .filter(|w| !w.is_empty())
        .take(MAX_KEYWORD_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_view_state(html: &str) -> Option<String> {
    VIEW_STATE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str()))
}

fn parse_result_page(url: &str, html: &str) -> std::result::Result<ResultPage, SourceFailure> {
    let rows: Vec<ResultRow> = RESULT_ROW
        .captures_iter(html)
        .filter_map(|caps| {
            let data_ri = caps.get(1)?.as_str().to_string();
            let inner = caps.get(2)?.as_str();
            let cells: Vec<String> = CELL
                .captures_iter(inner)
                .filter_map(|c| c.get(1))
                .map(|m| cell_text(m.as_str()))
                .collect();
            let row_text = cells.join(" ");
            if row_text.trim().is_empty() || NO_RESULTS.is_match(&row_text) {
                return None;
            }
            Some(ResultRow {
                data_ri,
                cells,
                document_form: parse_document_link(inner),
            })
        })
        .collect();

    if rows.is_empty() && !NO_RESULTS.is_match(html) {
        return Err(SourceFailure::Transient(
            "result table not found (UI changed?)".to_string(),
        ));
    }

    let view_state = parse_view_state(html).unwrap_or_default();
    if !rows.is_empty() && view_state.is_empty() {
        return Err(SourceFailure::Transient(
            "result page carries no view state (UI changed?)".to_string(),
        ));
    }

    Ok(ResultPage {
        url: url.to_string(),
        view_state,
        rows,
    })
}

fn parse_document_link(row_html: &str) -> Option<(String, Vec<(String, String)>)> {
    let onclick = decode_entities(AD_LINK.captures(row_html)?.get(1)?.as_str());
    let form_id = SUBMIT_FORM.captures(&onclick)?.get(1)?.as_str().to_string();
    let params = SUBMIT_PARAM
        .captures_iter(&onclick)
        .filter_map(|c| Some((c.get(1)?.as_str().to_string(), c.get(2)?.as_str().to_string())))
        .collect();
    Some((form_id, params))
}

fn cell_text(html: &str) -> String {
    let text = decode_entities(&TAG.replace_all(html, " "));
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Whether `text` contains `plz` as a standalone token.
///
/// # Examples
/// ```ignore
/// assert!(looks_like_same_zip("80331 München", "80331"));
/// assert!(!looks_like_same_zip("803310 München", "80331"));
/// ```
fn looks_like_same_zip(text: &str, plz: &str) -> bool {
    let plz = plz.trim();
    if text.is_empty() || plz.is_empty() {
        return false;
    }
    Regex::new(&format!(r"\b{}\b", regex::escape(plz)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_HTML: &str = r##"
<form id="ergebnissForm">
<table><tbody id="ergebnissForm:selectedSuchErgebnisFormTable_data">
<tr data-ri="0" class="ui-widget-content">
  <td>Bayern</td><td>Amtsgericht München HRB 12345</td><td>ACME GmbH</td><td>München 80331</td><td>aktuell</td>
  <td><a id="ergebnissForm:t:0:ad" href="#" onclick="PrimeFaces.addSubmitParam('ergebnissForm',{'ergebnissForm:t:0:ad':'ergebnissForm:t:0:ad','property':'Global.Dokumentart.AD'}).submit('ergebnissForm');return false;">AD</a></td>
</tr>
<tr data-ri="1" class="ui-widget-content">
  <td>Berlin</td><td>Amtsgericht Charlottenburg HRB 999</td><td>ACME &amp; Co. GmbH</td><td>Berlin 10115</td><td>aktuell</td>
</tr>
</tbody></table>
<input type="hidden" name="javax.faces.ViewState" id="j_id1:javax.faces.ViewState:0" value="-123:456" />
</form>"##;

    #[test]
    fn test_limit_keywords() {
        assert_eq!(limit_keywords("ACME GMBH"), "ACME GMBH");
        assert_eq!(
            limit_keywords("Müller-Lüdenscheid Bau und Handel GmbH & Co KG"),
            "Müller Lüdenscheid Bau und Handel"
        );
    }

    #[test]
    fn test_parse_view_state() {
        assert_eq!(parse_view_state(RESULT_HTML).as_deref(), Some("-123:456"));
        assert_eq!(parse_view_state("<html></html>"), None);
    }

    #[test]
    fn test_parse_result_page_rows() {
        let page = parse_result_page("https://x/sucheErgebnisse.xhtml", RESULT_HTML).unwrap();
        assert_eq!(page.rows.len(), 2);

        let first = page.rows[0].to_candidate();
        assert_eq!(first.name, "ACME GmbH");
        assert_eq!(first.handle, "0");
        assert_eq!(first.position, Some(0));
        assert_eq!(first.court.as_deref(), Some("Amtsgericht München HRB 12345"));

        let second = page.rows[1].to_candidate();
        assert_eq!(second.name, "ACME & Co. GmbH");
        assert!(page.rows[1].document_form.is_none());
    }

    #[test]
    fn test_parse_document_link() {
        let page = parse_result_page("u", RESULT_HTML).unwrap();
        let (form_id, params) = page.rows[0].document_form.clone().unwrap();
        assert_eq!(form_id, "ergebnissForm");
        assert!(params.contains(&("property".to_string(), "Global.Dokumentart.AD".to_string())));
    }

    #[test]
    fn test_parse_result_page_empty_message() {
        let html = r#"<table><tr class="ui-datatable-empty-message"><td>Keine Daten gefunden.</td></tr></table>"#;
        let page = parse_result_page("u", html).unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_parse_result_page_ui_drift_is_transient() {
        let err = parse_result_page("u", "<html><body>Wartungsarbeiten</body></html>").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_looks_like_same_zip() {
        assert!(looks_like_same_zip("München 80331", "80331"));
        assert!(!looks_like_same_zip("München 803310", "80331"));
        assert!(!looks_like_same_zip("", "80331"));
    }

    #[test]
    fn test_hourly_quota() {
        let start = Instant::now();
        let mut quota = HourlyQuota::new(2, Duration::from_secs(60));

        assert_eq!(quota.wait_time(start), None);
        quota.record(start);
        quota.record(start + Duration::from_secs(10));

        let wait = quota.wait_time(start + Duration::from_secs(20)).unwrap();
        assert_eq!(wait, Duration::from_secs(40));
        assert_eq!(quota.wait_time(start + Duration::from_secs(60)), None);

        quota.record(start + Duration::from_secs(61));
        assert_eq!(quota.issued.len(), 2);
    }
}
