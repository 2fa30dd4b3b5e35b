//! Ordered strategy lists: run each in turn, stop at the first non-empty result.

use super::table::{RowFilter, TableLocator, read_visible_rows, records_from_json, try_parse_table, visible_only};
use crate::browser::{ElementHandle, Locator, PageScript, RemoteBrowser};
use crate::control::{CancellationToken, StatusSink};
use crate::error::{ExtractError, Result};
use crate::models::RowRecord;
use crate::utils::preview;
use std::fmt;
use tracing::{debug, info};

const MIN_TABLE_TEXT: usize = 10;
const MIN_DIV_TEXT: usize = 20;
const STRUCTURED_DIVS: &str = "div[class*='table'], div[class*='grid'], div[class*='data']";

/// One way of getting rows out of the current page.
#[derive(Debug, Clone, PartialEq)]
pub enum TableStrategy {
    /// Parse a table found by id, selector or handle.
    Table(TableLocator),
    /// Bulk script read of one table element.
    ElementScript(ElementHandle),
    /// Row-by-row read of one table element.
    ElementRows(ElementHandle),
    /// Page-wide script: first table yielding data.
    ScriptScan,
    /// Every visible table with some text, parsed in turn.
    VisibleTables,
    /// A visible data-looking div captured as a single `Dados` record.
    StructuredDivs,
}

impl fmt::Display for TableStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(loc) => write!(f, "{loc}"),
            Self::ElementScript(_) => f.write_str("script read of matched table"),
            Self::ElementRows(_) => f.write_str("row read of matched table"),
            Self::ScriptScan => f.write_str("page-wide table scan"),
            Self::VisibleTables => f.write_str("visible tables"),
            Self::StructuredDivs => f.write_str("structured divs"),
        }
    }
}

impl TableStrategy {
    pub async fn run(&self, browser: &dyn RemoteBrowser, filter: RowFilter) -> Result<Vec<RowRecord>> {
        match self {
            Self::Table(locator) => try_parse_table(browser, locator, filter).await,
            Self::ElementScript(table) => {
                let value = browser.evaluate(&PageScript::ReadTable(table.clone())).await?;
                Ok(records_from_json(value))
            }
            Self::ElementRows(table) => read_visible_rows(browser, table).await,
            Self::ScriptScan => Ok(records_from_json(browser.evaluate(&PageScript::ScanTables).await?)),
            Self::VisibleTables => visible_tables(browser).await,
            Self::StructuredDivs => structured_divs(browser).await,
        }
    }
}

async fn visible_tables(browser: &dyn RemoteBrowser) -> Result<Vec<RowRecord>> {
    let tables = visible_only(browser, browser.find_all(&Locator::tag("table")).await?).await?;
    for (i, table) in tables.into_iter().enumerate() {
        if browser.text(&table).await?.chars().count() < MIN_TABLE_TEXT {
            continue;
        }
        match try_parse_table(browser, &TableLocator::Element(table), RowFilter::Relevant).await {
            Ok(rows) if !rows.is_empty() => {
                debug!("visible table {} has {} row(s)", i + 1, rows.len());
                return Ok(rows);
            }
            Ok(_) => {}
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => debug!("visible table {} failed: {}", i + 1, e),
        }
    }
    Ok(Vec::new())
}

async fn structured_divs(browser: &dyn RemoteBrowser) -> Result<Vec<RowRecord>> {
    for div in browser.find_all(&Locator::css(STRUCTURED_DIVS)).await? {
        if !browser.is_displayed(&div).await? {
            continue;
        }
        let text = browser.text(&div).await?;
        let text = text.trim();
        if text.chars().count() > MIN_DIV_TEXT && text.chars().any(|c| c.is_ascii_digit()) {
            return Ok(vec![RowRecord::new().with("Dados", text)]);
        }
    }
    Ok(Vec::new())
}

// ── Runner ───────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub struct CascadeOutcome<T> {
    pub rows: Vec<T>,
    /// Strategies actually invoked.
    pub attempted: usize,
    /// Index of the strategy whose rows were returned.
    pub winner: Option<usize>,
}

impl<T> CascadeOutcome<T> {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Invoke `strategies` in order until one returns rows.
///
/// An error or an empty result advances to the next strategy. Transport
/// failures and cancellation abort the cascade; exhausting the list is not
/// an error and yields an empty outcome.
pub async fn first_non_empty<S: fmt::Display, T>(
    label: &str,
    strategies: &[S],
    cancel: &CancellationToken,
    status: &dyn StatusSink,
    percent: Option<u8>,
    mut run: impl AsyncFnMut(&S) -> Result<Vec<T>>,
) -> Result<CascadeOutcome<T>> {
    for (i, strategy) in strategies.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        status.report(&format!("Tentando estratégia {} {}...", label, i + 1), percent);

        match run(strategy).await {
            Ok(rows) if !rows.is_empty() => {
                info!("{}: strategy {} ({}) found {} record(s)", label, i + 1, strategy, rows.len());
                return Ok(CascadeOutcome {
                    rows,
                    attempted: i + 1,
                    winner: Some(i),
                });
            }
            Ok(_) => debug!("{}: strategy {} ({}) found nothing", label, i + 1, strategy),
            Err(e) if e.is_transport() || e == ExtractError::Cancelled => return Err(e),
            Err(e) => status.report(
                &format!("Estratégia {} {} falhou: {}", label, i + 1, preview(&e.to_string(), 50)),
                percent,
            ),
        }
    }

    Ok(CascadeOutcome {
        rows: Vec::new(),
        attempted: strategies.len(),
        winner: None,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::snapshot::SnapshotBrowser;
    use crate::control::status::RecordingStatus;

    #[tokio::test]
    async fn test_stops_at_first_non_empty_strategy() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let strategies = [1, 2, 3, 4];
        let mut invoked = Vec::new();

        let outcome = first_non_empty("teste", &strategies, &cancel, &status, None, async |s: &i32| {
            invoked.push(*s);
            match *s {
                1 => Ok(vec![]),
                2 => Err(ExtractError::NotFound("table".into())),
                n => Ok(vec![n * 10, n * 100]),
            }
        })
        .await
        .unwrap();

        assert_eq!(invoked, vec![1, 2, 3]);
        assert_eq!(outcome.rows, vec![30, 300]);
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.winner, Some(2));
        assert!(status.contains("falhou"));
    }

    #[tokio::test]
    async fn test_exhausted_cascade_is_empty_not_error() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let outcome = first_non_empty("teste", &["a", "b"], &cancel, &status, None, async |_: &&str| {
            Ok::<Vec<u8>, _>(vec![])
        })
        .await
        .unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.winner, None);
    }

    #[tokio::test]
    async fn test_transport_and_cancel_abort() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let mut invoked = 0;
        let err = first_non_empty("teste", &[1, 2], &cancel, &status, None, async |_: &i32| {
            invoked += 1;
            Err::<Vec<u8>, _>(ExtractError::Transport("session deleted".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(invoked, 1);

        cancel.cancel();
        let err = first_non_empty("teste", &[1], &cancel, &status, None, async |_: &i32| Ok(vec![1]))
            .await
            .unwrap_err();
        assert_eq!(err, ExtractError::Cancelled);
    }

    #[tokio::test]
    async fn test_page_level_strategies() {
        let url = "https://site.test/carteiras/resumo/";
        let b = SnapshotBrowser::new().with_page(
            url,
            r#"<table><tr><td>x</td></tr></table>
               <table><tr><th>Ativo</th><th>Preço</th></tr><tr><td>BBAS3</td><td>27,90</td></tr></table>
               <div class="data-box">Patrimônio total R$ 12.345,67</div>"#,
        );
        b.navigate(url).await.unwrap();

        let scan = TableStrategy::ScriptScan.run(&b, RowFilter::All).await.unwrap();
        assert_eq!(scan[0].get("Preço"), Some("27,90"));

        let visible = TableStrategy::VisibleTables.run(&b, RowFilter::Relevant).await.unwrap();
        assert_eq!(visible[0].get("Ativo"), Some("BBAS3"));

        let divs = TableStrategy::StructuredDivs.run(&b, RowFilter::All).await.unwrap();
        assert_eq!(divs, vec![RowRecord::new().with("Dados", "Patrimônio total R$ 12.345,67")]);
    }
}
