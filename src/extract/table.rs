//! Table parsing over the remote browser capability.
//!
//! Header resolution order: `thead th` cells, then the first row's `th`
//! cells, then the first row's `td` cells, then generic `Coluna N` names.
//! Body rows come from `tbody` when present (minus a header row that lives
//! inside it), otherwise every row after the header row. Only rows the
//! browser reports as displayed are kept.

use crate::browser::{ElementHandle, Locator, RemoteBrowser};
use crate::error::{ExtractError, Result};
use crate::models::RowRecord;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Tried in order when no table id or selector is given.
pub const AUTO_TABLE_SELECTORS: &[&str] = &[
    "table",
    "div.table",
    ".table-responsive table",
    ".dataTables_wrapper table",
    "#Ticker-tickers",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TableLocator {
    Id(String),
    Css(String),
    Element(ElementHandle),
    Auto,
}

impl TableLocator {
    pub fn id(s: &str) -> Self {
        Self::Id(s.to_string())
    }

    pub fn css(s: &str) -> Self {
        Self::Css(s.to_string())
    }
}

impl fmt::Display for TableLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "table id={id}"),
            Self::Css(css) => write!(f, "table css={css}"),
            Self::Element(h) => write!(f, "table element {}", h.key),
            Self::Auto => f.write_str("first table on page"),
        }
    }
}

/// Which rows survive parsing.
///
/// The stock portfolio keeps every row (`All`); the funds table strategies
/// drop rows whose cells are all blank (`Relevant`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFilter {
    #[default]
    All,
    Relevant,
}

pub fn generic_header(index: usize) -> String {
    format!("Coluna {}", index + 1)
}

fn header_name(headers: &[String], index: usize) -> String {
    headers
        .get(index)
        .filter(|h| !h.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| generic_header(index))
}

/// Pair cells with header names by position. Cells beyond the header count
/// and blank header names get generic names.
pub fn zip_cells(headers: &[String], cells: Vec<String>) -> RowRecord {
    cells
        .into_iter()
        .enumerate()
        .map(|(i, cell)| (header_name(headers, i), cell.trim().to_string()))
        .collect()
}

/// Row objects returned by the bulk table scripts.
pub fn records_from_json(value: Value) -> Vec<RowRecord> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(
                map.into_iter()
                    .map(|(k, v)| (k, json_text(v)))
                    .collect::<RowRecord>(),
            ),
            _ => None,
        })
        .filter(|row| !row.is_empty())
        .collect()
}

fn json_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Element helpers ──────────────────────────────────────────────────────────

async fn first_match(browser: &dyn RemoteBrowser, locator: &Locator) -> Result<Option<ElementHandle>> {
    Ok(browser.find_all(locator).await?.into_iter().next())
}

async fn texts(browser: &dyn RemoteBrowser, handles: &[ElementHandle]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        out.push(browser.text(h).await?.trim().to_string());
    }
    Ok(out)
}

pub(crate) async fn visible_only(
    browser: &dyn RemoteBrowser,
    handles: Vec<ElementHandle>,
) -> Result<Vec<ElementHandle>> {
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        if browser.is_displayed(&h).await? {
            out.push(h);
        }
    }
    Ok(out)
}

pub async fn resolve_table(browser: &dyn RemoteBrowser, locator: &TableLocator) -> Result<ElementHandle> {
    match locator {
        TableLocator::Id(id) => first_match(browser, &Locator::id(id))
            .await?
            .ok_or_else(|| ExtractError::NotFound(locator.to_string())),
        TableLocator::Css(css) => first_match(browser, &Locator::css(css))
            .await?
            .ok_or_else(|| ExtractError::NotFound(locator.to_string())),
        TableLocator::Element(handle) => Ok(handle.clone()),
        TableLocator::Auto => {
            for css in AUTO_TABLE_SELECTORS {
                match first_match(browser, &Locator::css(css)).await {
                    Ok(Some(handle)) => return Ok(handle),
                    Ok(None) => continue,
                    Err(e) if e.is_transport() => return Err(e),
                    Err(e) => debug!("fallback selector {} failed: {}", css, e),
                }
            }
            Err(ExtractError::NotFound("no table on page".into()))
        }
    }
}

struct HeaderRow {
    names: Vec<String>,
    /// The row the names were read from, when it is a body row.
    row: Option<ElementHandle>,
}

async fn resolve_headers(browser: &dyn RemoteBrowser, table: &ElementHandle) -> Result<Option<HeaderRow>> {
    let thead = browser.find_within(table, &Locator::css("thead th")).await?;
    if !thead.is_empty() {
        let names = texts(browser, &thead).await?;
        if names.iter().any(|n| !n.is_empty()) {
            return Ok(Some(HeaderRow { names, row: None }));
        }
    }

    let Some(first_row) = first_row(browser, table).await? else {
        return Ok(None);
    };
    for tag in ["th", "td"] {
        let cells = browser.find_within(&first_row, &Locator::tag(tag)).await?;
        if cells.is_empty() {
            continue;
        }
        let names = texts(browser, &cells).await?;
        if names.iter().all(|n| n.is_empty()) {
            return Ok(None);
        }
        return Ok(Some(HeaderRow {
            names,
            row: Some(first_row),
        }));
    }
    Ok(None)
}

async fn first_row(browser: &dyn RemoteBrowser, table: &ElementHandle) -> Result<Option<ElementHandle>> {
    Ok(browser
        .find_within(table, &Locator::tag("tr"))
        .await?
        .into_iter()
        .next())
}

async fn body_rows(
    browser: &dyn RemoteBrowser,
    table: &ElementHandle,
    header: Option<&HeaderRow>,
) -> Result<Vec<ElementHandle>> {
    let tbody = browser
        .find_within(table, &Locator::tag("tbody"))
        .await?
        .into_iter()
        .next();

    let rows = match tbody {
        Some(body) => {
            let rows = browser.find_within(&body, &Locator::tag("tr")).await?;
            match header.and_then(|h| h.row.as_ref()) {
                Some(header_row) => rows.into_iter().filter(|r| r != header_row).collect(),
                None => rows,
            }
        }
        None => {
            let rows = browser.find_within(table, &Locator::tag("tr")).await?;
            let skip = usize::from(header.is_some());
            rows.into_iter().skip(skip).collect()
        }
    };
    Ok(rows)
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse one table into row records.
///
/// Transport failures are returned so the caller can recreate the session;
/// [`parse_table`] is the variant that swallows every error.
pub async fn try_parse_table(
    browser: &dyn RemoteBrowser,
    locator: &TableLocator,
    filter: RowFilter,
) -> Result<Vec<RowRecord>> {
    let table = resolve_table(browser, locator).await?;
    let header = resolve_headers(browser, &table).await?;
    let names: &[String] = header.as_ref().map(|h| h.names.as_slice()).unwrap_or(&[]);

    let mut records = Vec::new();
    for row in body_rows(browser, &table, header.as_ref()).await? {
        if !browser.is_displayed(&row).await? {
            continue;
        }
        let cells = browser.find_within(&row, &Locator::tag("td")).await?;
        if cells.is_empty() {
            continue;
        }
        let record = zip_cells(names, texts(browser, &cells).await?);
        if filter == RowFilter::Relevant && record.is_blank() {
            continue;
        }
        records.push(record);
    }

    debug!("{}: {} row(s)", locator, records.len());
    Ok(records)
}

pub async fn parse_table(browser: &dyn RemoteBrowser, locator: &TableLocator, filter: RowFilter) -> Vec<RowRecord> {
    match try_parse_table(browser, locator, filter).await {
        Ok(rows) => rows,
        Err(e) => {
            debug!("{} not parsed: {}", locator, e);
            Vec::new()
        }
    }
}

/// Row-by-row read of the visible rows of a table: the first visible row
/// supplies headers when it has any text; empty cells are left out.
pub async fn read_visible_rows(browser: &dyn RemoteBrowser, table: &ElementHandle) -> Result<Vec<RowRecord>> {
    let rows = browser.find_within(table, &Locator::tag("tr")).await?;
    let visible = visible_only(browser, rows).await?;
    let Some(first) = visible.first() else {
        return Ok(Vec::new());
    };

    let mut headers = Vec::new();
    for tag in ["th", "td"] {
        let cells = browser.find_within(first, &Locator::tag(tag)).await?;
        if !cells.is_empty() {
            headers = texts(browser, &cells).await?;
            break;
        }
    }
    let start = usize::from(headers.iter().any(|h| !h.is_empty()));

    let mut records = Vec::new();
    for row in &visible[start..] {
        let cells = browser.find_within(row, &Locator::tag("td")).await?;
        if cells.is_empty() {
            continue;
        }
        let record: RowRecord = texts(browser, &cells)
            .await?
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.is_empty())
            .map(|(j, text)| (header_name(&headers, j), text))
            .collect();
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
