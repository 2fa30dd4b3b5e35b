//! Static-page backend: saved HTML served by URL, parsed with `scraper`.
//!
//! Visibility follows the markup (`hidden`, `display:none`, `visibility:hidden`
//! on the element or an ancestor). Clicking an element whose `onclick` names a
//! `#target` toggles that target's visibility, which is how the site collapses
//! and expands its wallet sections. Navigation resets toggles and invalidates
//! every handle issued on the previous page.
//!
//! Failure injection hooks (`fail_navigations`, `fail_opens`) and call
//! counters make the retry and recovery paths observable offline.

use super::{ElementHandle, Locator, PageScript, RemoteBrowser};
use crate::error::{ExtractError, Result};
use crate::extract::table::{generic_header, zip_cells};
use crate::models::{NOT_AVAILABLE, RowRecord};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

const BLANK_URL: &str = "about:blank";

static TOGGLE_TARGET: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"#([A-Za-z0-9_-]+)").ok());

#[derive(Debug, Default)]
struct SnapshotState {
    current: Option<String>,
    toggled: HashSet<String>,
    generation: u64,
    calls: usize,
    opens: usize,
    closed: bool,
    nav_failures: VecDeque<ExtractError>,
    open_failures: usize,
}

#[derive(Debug, Default)]
pub struct SnapshotBrowser {
    pages: HashMap<String, String>,
    state: Mutex<SnapshotState>,
}

fn page_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ExtractError::MalformedSelector(format!("{css}: {e:?}")))
}

fn all_elements() -> Result<Selector> {
    parse_selector("*")
}

impl SnapshotBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(page_key(url), html.into());
        self
    }

    /// Serve a saved page from disk under `url`.
    pub fn with_file(self, url: &str, path: &Path) -> anyhow::Result<Self> {
        let html = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {:?}: {}", path, e))?;
        Ok(self.with_page(url, html))
    }

    /// Queue errors returned by the next navigations, in order.
    pub fn fail_navigations(&self, errors: impl IntoIterator<Item = ExtractError>) {
        self.lock().nav_failures.extend(errors);
    }

    /// Make the next `n` session opens fail with a transport error.
    pub fn fail_opens(&self, n: usize) {
        self.lock().open_failures += n;
    }

    /// Total capability calls issued so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Sessions successfully reopened.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    fn lock(&self) -> MutexGuard<'_, SnapshotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call and return the state for an open session.
    fn enter(&self) -> Result<MutexGuard<'_, SnapshotState>> {
        let mut state = self.lock();
        state.calls += 1;
        if state.closed {
            return Err(ExtractError::Transport("session closed".into()));
        }
        Ok(state)
    }

    fn document(&self, state: &SnapshotState) -> Result<Html> {
        let html = state
            .current
            .as_ref()
            .and_then(|url| self.pages.get(&page_key(url)))
            .ok_or_else(|| ExtractError::NotFound("no page loaded".into()))?;
        Ok(Html::parse_document(html))
    }

    fn check_generation(state: &SnapshotState, handle: &ElementHandle) -> Result<usize> {
        if handle.generation != state.generation {
            return Err(ExtractError::NotFound(format!(
                "stale element handle {} (generation {} < {})",
                handle.key, handle.generation, state.generation
            )));
        }
        handle
            .key
            .parse()
            .map_err(|_| ExtractError::NotFound(format!("unknown element handle {}", handle.key)))
    }

    // ── sync bodies ─────────────────────────────────────────────────────────

    fn navigate_sync(&self, url: &str) -> Result<()> {
        let mut state = self.enter()?;
        state.generation += 1;
        if let Some(err) = state.nav_failures.pop_front() {
            return Err(err);
        }
        if !self.pages.contains_key(&page_key(url)) {
            return Err(ExtractError::Timeout(format!("page did not load: {url}")));
        }
        state.current = Some(url.to_string());
        state.toggled.clear();
        Ok(())
    }

    fn find_sync(&self, parent: Option<&ElementHandle>, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let state = self.enter()?;
        let doc = self.document(&state)?;
        let sel = parse_selector(&locator.to_css())?;
        let all: Vec<ElementRef> = doc.select(&all_elements()?).collect();
        let index: HashMap<_, usize> = all.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();

        let matches: Vec<ElementRef> = match parent {
            Some(handle) => {
                let idx = Self::check_generation(&state, handle)?;
                let scope = all
                    .get(idx)
                    .ok_or_else(|| ExtractError::NotFound(format!("element {idx} vanished")))?;
                scope.select(&sel).collect()
            }
            None => doc.select(&sel).collect(),
        };

        Ok(matches
            .iter()
            .filter_map(|e| index.get(&e.id()))
            .map(|i| ElementHandle::new(state.generation, i.to_string()))
            .collect())
    }

    fn with_element<R>(
        &self,
        handle: &ElementHandle,
        f: impl FnOnce(ElementRef<'_>, &mut SnapshotState) -> R,
    ) -> Result<R> {
        let mut state = self.enter()?;
        let idx = Self::check_generation(&state, handle)?;
        let doc = self.document(&state)?;
        let el = doc
            .select(&all_elements()?)
            .nth(idx)
            .ok_or_else(|| ExtractError::NotFound(format!("element {idx} vanished")))?;
        Ok(f(el, &mut *state))
    }

    fn evaluate_sync(&self, script: &PageScript) -> Result<Value> {
        match script {
            PageScript::QueryTexts(selectors) => {
                let state = self.enter()?;
                let doc = self.document(&state)?;
                let mut out = Map::new();
                for css in selectors {
                    let text = Selector::parse(css)
                        .ok()
                        .and_then(|sel| doc.select(&sel).next())
                        .map(|el| text_content(&el))
                        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
                    out.insert(css.clone(), Value::String(text));
                }
                Ok(Value::Object(out))
            }
            PageScript::ReadTable(handle) => {
                self.with_element(handle, |el, _| rows_to_json(read_table(&el)))
            }
            PageScript::ScanTables => {
                let state = self.enter()?;
                let doc = self.document(&state)?;
                let table_sel = parse_selector("table")?;
                let rows = doc
                    .select(&table_sel)
                    .map(|t| scan_table(&t))
                    .find(|rows| !rows.is_empty())
                    .unwrap_or_default();
                Ok(rows_to_json(rows))
            }
            PageScript::Click(handle) => {
                let targets = self.with_element(handle, |el, _| toggle_targets(&el))?;
                let mut state = self.lock();
                for id in targets {
                    if !state.toggled.remove(&id) {
                        state.toggled.insert(id);
                    }
                }
                Ok(Value::Null)
            }
        }
    }

    fn open_sync(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls += 1;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(ExtractError::Transport("browser could not be relaunched".into()));
        }
        state.generation += 1;
        state.current = None;
        state.toggled.clear();
        state.closed = false;
        state.opens += 1;
        Ok(())
    }
}

// ── DOM helpers ───────────────────────────────────────────────────────────────

fn hidden_by_markup(el: &ElementRef) -> bool {
    let v = el.value();
    if v.attr("hidden").is_some() {
        return true;
    }
    v.attr("style")
        .map(|style| {
            let s: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            s.contains("display:none") || s.contains("visibility:hidden")
        })
        .unwrap_or(false)
}

fn effectively_hidden(el: &ElementRef, toggled: &HashSet<String>) -> bool {
    let base = hidden_by_markup(el);
    match el.value().id() {
        Some(id) if toggled.contains(id) => !base,
        _ => base,
    }
}

fn is_visible(el: &ElementRef, toggled: &HashSet<String>) -> bool {
    !effectively_hidden(el, toggled)
        && el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .all(|a| !effectively_hidden(&a, toggled))
}

/// `textContent.trim()`.
fn text_content(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Rendered text: whitespace collapsed.
fn rendered_text(el: &ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn child_cells(row: &ElementRef, css: &str) -> Vec<String> {
    match Selector::parse(css) {
        Ok(sel) => row.select(&sel).map(|c| text_content(&c)).collect(),
        Err(_) => Vec::new(),
    }
}

fn table_rows<'a>(table: &ElementRef<'a>) -> Vec<ElementRef<'a>> {
    match Selector::parse("tr") {
        Ok(sel) => table.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

/// Bulk read of one table: first row supplies headers when it has any cells,
/// generic names otherwise; rows keep only non-empty cells.
fn read_table(table: &ElementRef) -> Vec<RowRecord> {
    if table.value().name() != "table" {
        return Vec::new();
    }
    let rows = table_rows(table);
    let Some(first) = rows.first() else {
        return Vec::new();
    };

    let mut headers = child_cells(first, "th, td");
    let start = if headers.is_empty() { 0 } else { 1 };
    if headers.is_empty() {
        let widest = rows.iter().map(|r| child_cells(r, "td").len()).max().unwrap_or(0);
        headers = (0..widest).map(generic_header).collect();
    }
    for (i, header) in headers.iter_mut().enumerate() {
        if header.is_empty() {
            *header = generic_header(i);
        }
    }

    rows.iter()
        .skip(start)
        .filter_map(|row| {
            let record: RowRecord = child_cells(row, "td")
                .into_iter()
                .zip(headers.iter())
                .filter(|(cell, _)| !cell.is_empty())
                .map(|(cell, header)| (header.clone(), cell))
                .collect();
            (!record.is_empty()).then_some(record)
        })
        .collect()
}

/// Page-wide fallback for one table: first row as headers, then every row
/// with data cells, truncated to the header count.
fn scan_table(table: &ElementRef) -> Vec<RowRecord> {
    let rows = table_rows(table);
    if rows.len() <= 1 {
        return Vec::new();
    }
    let headers = child_cells(&rows[0], "th, td");
    rows.iter()
        .skip(1)
        .filter_map(|row| {
            let cells = child_cells(row, "td");
            if cells.is_empty() {
                return None;
            }
            let n = cells.len().min(headers.len());
            Some(zip_cells(&headers[..n], cells.into_iter().take(n).collect()))
        })
        .collect()
}

fn rows_to_json(rows: Vec<RowRecord>) -> Value {
    Value::Array(
        rows.into_iter()
            .map(|row| {
                Value::Object(
                    row.iter()
                        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Ids named in the nearest `onclick` handler, walking up like event bubbling.
fn toggle_targets(el: &ElementRef) -> Vec<String> {
    let Some(id_re) = TOGGLE_TARGET.as_ref() else {
        return Vec::new();
    };
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .find_map(|e| e.value().attr("onclick").map(str::to_string))
        .map(|onclick| {
            id_re
                .captures_iter(&onclick)
                .map(|c| c[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

// ── RemoteBrowser ─────────────────────────────────────────────────────────────

#[async_trait]
impl RemoteBrowser for SnapshotBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.navigate_sync(url)
    }

    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<ElementHandle> {
        self.find_sync(None, locator)?
            .into_iter()
            .next()
            .ok_or_else(|| ExtractError::Timeout(format!("{locator} not present after {timeout:?}")))
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        self.find_sync(None, locator)
    }

    async fn find_within(&self, parent: &ElementHandle, locator: &Locator) -> Result<Vec<ElementHandle>> {
        self.find_sync(Some(parent), locator)
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        self.with_element(element, |el, state| {
            if is_visible(&el, &state.toggled) {
                rendered_text(&el)
            } else {
                String::new()
            }
        })
    }

    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool> {
        self.with_element(element, |el, state| is_visible(&el, &state.toggled))
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.with_element(element, |el, _| el.value().attr(name).map(str::to_string))
    }

    async fn evaluate(&self, script: &PageScript) -> Result<Value> {
        self.evaluate_sync(script)
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.enter()?;
        Ok(state.current.clone().unwrap_or_else(|| BLANK_URL.to_string()))
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls += 1;
        state.generation += 1;
        state.closed = true;
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        self.open_sync()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
