//! Remote browser capability: the narrow surface the extraction engine drives.
//!
//! Two backends implement [`RemoteBrowser`]:
//!   - [`webdriver::WebDriverBrowser`] drives a live Chrome session over WebDriver.
//!   - [`snapshot::SnapshotBrowser`] serves saved HTML pages; scripts are
//!     interpreted natively instead of being sent as JavaScript.
//!
//! Neither backend is meant to be driven from more than one task at a time.

pub mod snapshot;
pub mod webdriver;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

// ── Locators ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Css(String),
    Tag(String),
    /// One or more space-separated class names, all required.
    Class(String),
}

impl Locator {
    pub fn id(s: &str) -> Self {
        Self::Id(s.to_string())
    }

    pub fn css(s: &str) -> Self {
        Self::Css(s.to_string())
    }

    pub fn tag(s: &str) -> Self {
        Self::Tag(s.to_string())
    }

    pub fn class(s: &str) -> Self {
        Self::Class(s.to_string())
    }

    /// Equivalent CSS selector; ids go through an attribute match so that
    /// ids starting with a digit stay valid.
    pub fn to_css(&self) -> String {
        match self {
            Self::Id(id) => format!("[id=\"{}\"]", id.replace('"', "\\\"")),
            Self::Css(css) => css.clone(),
            Self::Tag(tag) => tag.clone(),
            Self::Class(classes) => classes
                .split_whitespace()
                .map(|c| format!(".{c}"))
                .collect::<String>(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(v) => write!(f, "id={v}"),
            Self::Css(v) => write!(f, "css={v}"),
            Self::Tag(v) => write!(f, "tag={v}"),
            Self::Class(v) => write!(f, "class={v}"),
        }
    }
}

// ── Element handles ───────────────────────────────────────────────────────────

/// Opaque reference to an element in the current session.
///
/// Handles are stamped with the generation they were issued in. Navigating
/// or reopening the session bumps the generation and every older handle is
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub(crate) generation: u64,
    pub(crate) key: String,
}

impl ElementHandle {
    pub(crate) fn new(generation: u64, key: impl Into<String>) -> Self {
        Self {
            generation,
            key: key.into(),
        }
    }
}

// ── Bulk scripts ──────────────────────────────────────────────────────────────

/// Closed set of in-page scripts the engine evaluates.
///
/// Result shapes are part of the contract:
///   - `QueryTexts` → object `{selector: text}`, `"N/A"` for misses and invalid selectors
///   - `ReadTable` / `ScanTables` → array of `{header: cell}` objects
///   - `Click` → null
#[derive(Debug, Clone, PartialEq)]
pub enum PageScript {
    QueryTexts(Vec<String>),
    ReadTable(ElementHandle),
    ScanTables,
    Click(ElementHandle),
}

impl PageScript {
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryTexts(_) => "query-texts",
            Self::ReadTable(_) => "read-table",
            Self::ScanTables => "scan-tables",
            Self::Click(_) => "click",
        }
    }
}

// ── Capability ────────────────────────────────────────────────────────────────

#[async_trait]
pub trait RemoteBrowser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Bounded wait for the first element matching `locator` to be present.
    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<ElementHandle>;

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>>;

    async fn find_within(&self, parent: &ElementHandle, locator: &Locator) -> Result<Vec<ElementHandle>>;

    /// Rendered, trimmed text of the element.
    async fn text(&self, element: &ElementHandle) -> Result<String>;

    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool>;

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    async fn evaluate(&self, script: &PageScript) -> Result<Value>;

    async fn current_url(&self) -> Result<String>;

    /// End the session. Every call but `open` fails with a transport error
    /// until a new session is opened.
    async fn close(&self) -> Result<()>;

    /// Start a fresh session, replacing any open one. Invalidates every handle.
    async fn open(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_to_css() {
        assert_eq!(Locator::id("Ticker-tickers").to_css(), "[id=\"Ticker-tickers\"]");
        assert_eq!(Locator::class("cell  value").to_css(), ".cell.value");
        assert_eq!(Locator::tag("body").to_css(), "body");
        assert_eq!(Locator::css("table#Fii-tickers").to_css(), "table#Fii-tickers");
    }
}
