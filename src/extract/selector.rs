//! Column value resolution for user-configured selector specs.
//!
//! Simple columns are a two-level class lookup. Advanced columns go through
//! a batched in-page query, then a bounded element wait, then (for selectors
//! that address a table cell) direct row/column indexing. Every path ends in
//! a string; nothing here returns an error.

use super::table::{RowFilter, TableLocator, parse_table, visible_only};
use crate::browser::{ElementHandle, Locator, PageScript, RemoteBrowser};
use crate::error::ExtractError;
use crate::models::{ColumnDefinition, ColumnKind, NOT_AVAILABLE};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

const VISIBLE_EVEN: &str = "visible-even";

static NTH_CHILD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r":nth-child\(\s*(\d+)\s*\)").ok());
static CLASS_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\.([A-Za-z0-9_-]+)").ok());

// ── Cell addresses ───────────────────────────────────────────────────────────

/// A table cell encoded in a selector such as
/// `#table-indicators tr.visible-even:nth-child(4) > td:nth-child(2)`.
/// Indices are 1-based, as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellAddress {
    pub row: usize,
    pub column: usize,
    pub row_class: Option<String>,
}

impl CellAddress {
    /// Needs a `tr` compound followed by a `td`/`th` compound. A missing
    /// `:nth-child` defaults to 1.
    pub fn parse(selector: &str) -> Option<Self> {
        let segments = compound_segments(selector);
        let row_at = segments.iter().position(|s| element_name(s) == "tr")?;
        let cell = segments[row_at + 1..]
            .iter()
            .find(|s| matches!(element_name(s).as_str(), "td" | "th"))?;
        let row_seg = &segments[row_at];

        let row = nth_child(row_seg)?;
        let column = nth_child(cell)?;
        let row_class = first_class(row_seg);
        Some(Self { row, column, row_class })
    }

    pub fn row_index(&self) -> usize {
        self.row - 1
    }

    pub fn column_index(&self) -> usize {
        self.column - 1
    }
}

/// Split at descendant/child/sibling combinators outside brackets, parens
/// and quotes.
fn compound_segments(selector: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in selector.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
                continue;
            }
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                current.push(ch);
                continue;
            }
            None => {}
        }
        match ch {
            '[' | '(' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if depth == 0 && (c.is_whitespace() || matches!(c, '>' | '+' | '~')) => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn element_name(segment: &str) -> String {
    segment
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '*')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Outside `[...]` and `(...)` groups.
fn strip_groups(segment: &str) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    for ch in segment.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            c if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn nth_child(segment: &str) -> Option<usize> {
    match NTH_CHILD.as_ref()?.captures(segment) {
        Some(caps) => caps[1].parse().ok().filter(|n| *n > 0),
        None => Some(1),
    }
}

fn first_class(segment: &str) -> Option<String> {
    CLASS_NAME
        .as_ref()?
        .captures(&strip_groups(segment))
        .map(|c| c[1].to_string())
}

fn usable(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != NOT_AVAILABLE
}

// ── Resolver ─────────────────────────────────────────────────────────────────

pub struct SelectorResolver<'a> {
    browser: &'a dyn RemoteBrowser,
    cell_timeout: Duration,
}

impl<'a> SelectorResolver<'a> {
    pub fn new(browser: &'a dyn RemoteBrowser, cell_timeout: Duration) -> Self {
        Self { browser, cell_timeout }
    }

    /// Resolve every column against the current page, in column order.
    ///
    /// Simple columns sharing a search class share one lookup; advanced
    /// selectors are first resolved together in a single script round trip.
    pub async fn resolve_columns(&self, columns: &[ColumnDefinition]) -> Vec<(String, String)> {
        let mut containers: HashMap<&str, Vec<ElementHandle>> = HashMap::new();
        for col in columns.iter().filter(|c| c.kind == ColumnKind::Simple) {
            if let Some((search, _)) = col.class_pair() {
                if !containers.contains_key(search) {
                    let found = self.find_or_empty(&Locator::class(search)).await;
                    containers.insert(search, found);
                }
            }
        }

        let selectors: Vec<String> = columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Advanced)
            .filter_map(|c| c.selector().map(str::to_string))
            .collect();
        let batch = self.query_texts(selectors).await;

        let mut values = Vec::with_capacity(columns.len());
        for col in columns {
            let value = match (col.problem(), col.kind) {
                (Some(problem), _) => problem.to_string(),
                (None, ColumnKind::Simple) => match col.class_pair() {
                    Some((search, ret)) => {
                        let found = containers.get(search).map(Vec::as_slice).unwrap_or(&[]);
                        self.first_text_within(found, ret).await
                    }
                    None => NOT_AVAILABLE.to_string(),
                },
                (None, ColumnKind::Advanced) => match col.selector() {
                    Some(css) => match batch.get(css).and_then(Value::as_str).filter(|v| usable(v)) {
                        Some(v) => v.trim().to_string(),
                        None => self.resolve_after_query(css).await,
                    },
                    None => NOT_AVAILABLE.to_string(),
                },
            };
            debug!("column {} = {}", col.name, value);
            values.push((col.name.clone(), value));
        }
        values
    }

    pub async fn resolve(&self, column: &ColumnDefinition) -> String {
        self.resolve_columns(std::slice::from_ref(column))
            .await
            .pop()
            .map(|(_, v)| v)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Full advanced resolution of one selector.
    pub async fn resolve_selector(&self, css: &str) -> String {
        let batch = self.query_texts(vec![css.to_string()]).await;
        match batch.get(css).and_then(Value::as_str).filter(|v| usable(v)) {
            Some(v) => v.trim().to_string(),
            None => self.resolve_after_query(css).await,
        }
    }

    async fn query_texts(&self, selectors: Vec<String>) -> Map<String, Value> {
        if selectors.is_empty() {
            return Map::new();
        }
        match self.browser.evaluate(&PageScript::QueryTexts(selectors)).await {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                debug!("query-texts returned {}", other);
                Map::new()
            }
            Err(e) => {
                debug!("query-texts failed: {}", e);
                Map::new()
            }
        }
    }

    async fn find_or_empty(&self, locator: &Locator) -> Vec<ElementHandle> {
        self.browser.find_all(locator).await.unwrap_or_else(|e| {
            debug!("{} lookup failed: {}", locator, e);
            Vec::new()
        })
    }

    async fn text_of(&self, handle: &ElementHandle) -> Option<String> {
        match self.browser.text(handle).await {
            Ok(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
            _ => None,
        }
    }

    async fn first_text_within(&self, containers: &[ElementHandle], return_class: &str) -> String {
        let inner = Locator::class(return_class);
        for container in containers {
            let Ok(found) = self.browser.find_within(container, &inner).await else {
                continue;
            };
            if let Some(first) = found.first() {
                if let Some(text) = self.text_of(first).await {
                    return text;
                }
            }
        }
        NOT_AVAILABLE.to_string()
    }

    /// Steps after the batched query came back empty.
    async fn resolve_after_query(&self, css: &str) -> String {
        match self.browser.wait_for_element(&Locator::css(css), self.cell_timeout).await {
            Ok(handle) => {
                if let Some(text) = self.text_of(&handle).await {
                    return text;
                }
            }
            Err(ExtractError::MalformedSelector(e)) => warn!("malformed selector {}: {}", css, e),
            Err(e) => debug!("no element for {}: {}", css, e),
        }

        match CellAddress::parse(css) {
            Some(addr) => self.resolve_address(&addr).await,
            None => NOT_AVAILABLE.to_string(),
        }
    }

    pub async fn resolve_address(&self, addr: &CellAddress) -> String {
        match addr.row_class.as_deref() {
            Some(class) if class.contains(VISIBLE_EVEN) => self.visible_even_cell(addr).await,
            Some(class) => self.classed_row_cell(class, addr).await,
            None => self.table_cell(addr.row_index(), addr.column_index()).await,
        }
    }

    async fn cell_in_row(&self, row: &ElementHandle, column: usize) -> Option<String> {
        let cells = self.browser.find_within(row, &Locator::tag("td")).await.ok()?;
        self.text_of(cells.get(column)?).await
    }

    async fn visible_rows(&self, css: &str) -> Vec<ElementHandle> {
        let rows = self.find_or_empty(&Locator::css(css)).await;
        visible_only(self.browser, rows).await.unwrap_or_default()
    }

    /// Rows styled `visible-even` are the even rows among the visible ones,
    /// so row N of the selector is row N/2 of that subset.
    async fn visible_even_cell(&self, addr: &CellAddress) -> String {
        let direct = format!(
            "tbody > tr:nth-child({}) > td:nth-child({})",
            addr.row, addr.column
        );
        if let Ok(handle) = self.browser.wait_for_element(&Locator::css(&direct), self.cell_timeout).await {
            if self.browser.is_displayed(&handle).await.unwrap_or(false) {
                if let Some(text) = self.text_of(&handle).await {
                    return text;
                }
            }
        }

        let visible = self.visible_rows("table tbody tr").await;
        let mut even = Vec::new();
        for row in &visible {
            let class = self.browser.attribute(row, "class").await.ok().flatten();
            if class.is_some_and(|c| c.split_whitespace().any(|t| t == VISIBLE_EVEN)) {
                even.push(row.clone());
            }
        }
        if even.is_empty() {
            even = visible.iter().skip(1).step_by(2).cloned().collect();
        }

        if let Some(target) = (addr.row / 2).checked_sub(1).and_then(|i| even.get(i)) {
            if let Some(text) = self.cell_in_row(target, addr.column_index()).await {
                return text;
            }
        }
        self.table_cell(addr.row_index(), addr.column_index()).await
    }

    async fn classed_row_cell(&self, class: &str, addr: &CellAddress) -> String {
        let rows = self.visible_rows(&format!("tr.{class}")).await;
        if let Some(row) = rows.get(addr.row_index()) {
            if let Some(text) = self.cell_in_row(row, addr.column_index()).await {
                return text;
            }
        }
        self.table_cell(addr.row_index(), addr.column_index()).await
    }

    /// 0-based cell of the first body on the page, falling back to the
    /// parsed first table.
    async fn table_cell(&self, row: usize, column: usize) -> String {
        let css = format!("tbody > tr:nth-child({}) > td:nth-child({})", row + 1, column + 1);
        if let Ok(handle) = self.browser.wait_for_element(&Locator::css(&css), self.cell_timeout).await {
            if let Some(text) = self.text_of(&handle).await {
                return text;
            }
        }

        parse_table(self.browser, &TableLocator::Auto, RowFilter::All)
            .await
            .get(row)
            .and_then(|r| r.value_at(column))
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
