//! Funds (FII) section of the portfolio summary page.
//!
//! The section starts collapsed behind a clickable header and its table has
//! no stable position among the page's tables, so it is expanded first and
//! then picked out with progressively weaker evidence.

use super::cascade::TableStrategy;
use super::table::{TableLocator, visible_only};
use crate::browser::{ElementHandle, Locator, PageScript, RemoteBrowser};
use crate::control::StatusSink;
use crate::error::Result;
use std::time::Duration;
use tracing::debug;

const EXPAND_PERCENT: Option<u8> = Some(87);

/// Pause after clicking the section header.
pub const EXPAND_PAUSE: Duration = Duration::from_secs(2);

pub const FUND_KEYWORDS: &[&str] = &["fii", "fundo", "imobiliário"];

const HEADER_SELECTORS: &[&str] = &[
    "div.header[onclick*='ToggleFii']",
    "div.header[onclick*='toogleClass'][onclick*='#ToggleFii']",
    "div.header[onclick*='MyWallets.toogleClass']",
    "div.header[onclick*='toogleClass']",
];

const TABLE_BY_ID: &[&str] = &["#Fii-tickers", "table#Fii-tickers"];

const LEGACY_PATH: &str = ".section-actives > div:nth-child(3) > div:nth-child(1) > div:nth-child(1) \
     > div:nth-child(1) > div:nth-child(2) > div:nth-child(1) > div:nth-child(1) > div:nth-child(1) \
     > table:nth-child(1)";

/// Broader matches; a hit only counts when its text mentions funds.
const KEYWORD_SELECTORS: &[&str] = &[
    ".section-actives > div:nth-child(3) table:nth-child(2)",
    ".section-actives > div:nth-child(3) table:last-child",
    ".section-actives table:nth-child(2)",
    ".section-actives table:last-child",
    "table[id*='fii']",
    "table[class*='fii']",
    ".section-actives table:nth-of-type(2)",
    ".section-actives table",
];

const SECTION_TABLES: &str = ".section-actives table";

/// Blocks whose fund-mentioning text marks the table they hold.
const CONTAINERS: &str = "[class*='section'], [class*='container']";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    AlreadyVisible,
    Clicked,
    HeaderNotFound,
}

/// The funds table and, when it can be found again by selector, how.
#[derive(Debug, Clone, PartialEq)]
pub struct FundsTable {
    pub element: ElementHandle,
    pub selector: Option<String>,
}

fn mentions_funds(text: &str) -> bool {
    let lower = text.to_lowercase();
    FUND_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Lookup where anything but a transport failure counts as no match.
async fn find_lenient(browser: &dyn RemoteBrowser, css: &str) -> Result<Vec<ElementHandle>> {
    match browser.find_all(&Locator::css(css)).await {
        Ok(found) => Ok(found),
        Err(e) if e.is_transport() => Err(e),
        Err(e) => {
            debug!("selector {} skipped: {}", css, e);
            Ok(Vec::new())
        }
    }
}

async fn first_visible(browser: &dyn RemoteBrowser, css: &str) -> Result<Option<ElementHandle>> {
    Ok(visible_only(browser, find_lenient(browser, css).await?)
        .await?
        .into_iter()
        .next())
}

async fn table_visible(browser: &dyn RemoteBrowser) -> Result<bool> {
    Ok(first_visible(browser, "#Fii-tickers, table#Fii-tickers").await?.is_some())
}

async fn click(browser: &dyn RemoteBrowser, element: &ElementHandle) -> Result<()> {
    browser.evaluate(&PageScript::Click(element.clone())).await?;
    tokio::time::sleep(EXPAND_PAUSE).await;
    Ok(())
}

/// Open the collapsed funds section unless its table is already shown.
pub async fn expand_section(browser: &dyn RemoteBrowser, status: &dyn StatusSink) -> Result<Expansion> {
    status.report("Verificando se seção de FIIs precisa ser expandida...", EXPAND_PERCENT);
    if table_visible(browser).await? {
        status.report("Tabela de FIIs já está visível", EXPAND_PERCENT);
        return Ok(Expansion::AlreadyVisible);
    }

    for css in HEADER_SELECTORS {
        for header in find_lenient(browser, css).await? {
            if !browser.is_displayed(&header).await? {
                continue;
            }
            if !browser.text(&header).await?.to_uppercase().contains("FII") {
                continue;
            }
            status.report(&format!("Clicando para expandir seção de FIIs ({css})..."), EXPAND_PERCENT);
            click(browser, &header).await?;
            return Ok(Expansion::Clicked);
        }
    }

    status.report(
        "Cabeçalho de FIIs não encontrado, tentando procurar por texto...",
        EXPAND_PERCENT,
    );
    for candidate in find_lenient(browser, "[onclick]").await? {
        if !browser.is_displayed(&candidate).await? {
            continue;
        }
        let onclick = browser.attribute(&candidate, "onclick").await?.unwrap_or_default();
        if !onclick.to_lowercase().contains("toggle") {
            continue;
        }
        if browser.text(&candidate).await?.to_uppercase().contains("FII") {
            click(browser, &candidate).await?;
            return Ok(Expansion::Clicked);
        }
    }

    status.report(
        "Não foi possível encontrar o cabeçalho de FIIs para expandir",
        EXPAND_PERCENT,
    );
    Ok(Expansion::HeaderNotFound)
}

/// Table inside the tightest visible section or container whose text
/// mentions funds. Tightest means holding the fewest visible tables; on a tie
/// the later (more deeply nested) block wins.
async fn table_near_fund_text(browser: &dyn RemoteBrowser) -> Result<Option<ElementHandle>> {
    let mut best: Option<(usize, ElementHandle)> = None;
    for block in visible_only(browser, find_lenient(browser, CONTAINERS).await?).await? {
        if !mentions_funds(&browser.text(&block).await?) {
            continue;
        }
        let inner = match browser.find_within(&block, &Locator::tag("table")).await {
            Ok(found) => found,
            Err(e) if e.is_transport() => return Err(e),
            Err(_) => continue,
        };
        let tables = visible_only(browser, inner).await?;
        let Some(first) = tables.first() else {
            continue;
        };
        if best.as_ref().is_none_or(|(count, _)| tables.len() <= *count) {
            best = Some((tables.len(), first.clone()));
        }
    }
    Ok(best.map(|(_, table)| table))
}

/// Pick the funds table: id match, the long legacy path, keyword-bearing
/// tables, a table next to fund-mentioning text, then the second of exactly
/// two section tables, then a lone section table that mentions funds.
pub async fn locate_table(browser: &dyn RemoteBrowser, status: &dyn StatusSink) -> Result<Option<FundsTable>> {
    for css in TABLE_BY_ID.iter().chain(std::iter::once(&LEGACY_PATH)) {
        if let Some(element) = first_visible(browser, css).await? {
            status.report(&format!("Tabela de FIIs encontrada com seletor: {css}"), EXPAND_PERCENT);
            return Ok(Some(FundsTable {
                element,
                selector: Some(css.to_string()),
            }));
        }
    }

    for css in KEYWORD_SELECTORS {
        for element in visible_only(browser, find_lenient(browser, css).await?).await? {
            if mentions_funds(&browser.text(&element).await?) {
                status.report(&format!("Tabela de FIIs encontrada com seletor: {css}"), EXPAND_PERCENT);
                return Ok(Some(FundsTable {
                    element,
                    selector: None,
                }));
            }
        }
    }

    status.report("Procurando FIIs por texto específico...", EXPAND_PERCENT);
    if let Some(element) = table_near_fund_text(browser).await? {
        status.report("Tabela de FIIs encontrada por texto específico", EXPAND_PERCENT);
        return Ok(Some(FundsTable {
            element,
            selector: None,
        }));
    }

    let mut visible = visible_only(browser, find_lenient(browser, SECTION_TABLES).await?).await?;
    let pick = match visible.len() {
        2 => {
            status.report("Usando segunda tabela como FIIs", EXPAND_PERCENT);
            visible.pop()
        }
        1 => {
            let lone = visible.remove(0);
            if mentions_funds(&browser.text(&lone).await?) {
                status.report("Usando única tabela identificada como FIIs", EXPAND_PERCENT);
                Some(lone)
            } else {
                None
            }
        }
        _ => None,
    };
    Ok(pick.map(|element| FundsTable {
        element,
        selector: None,
    }))
}

/// Strategies for reading the located funds table, strongest first.
pub fn strategies(table: &FundsTable) -> Vec<TableStrategy> {
    let mut list = Vec::with_capacity(6);
    if let Some(css) = &table.selector {
        list.push(TableStrategy::Table(TableLocator::Css(css.clone())));
    }
    list.extend([
        TableStrategy::Table(TableLocator::Element(table.element.clone())),
        TableStrategy::ElementScript(table.element.clone()),
        TableStrategy::ElementRows(table.element.clone()),
        TableStrategy::VisibleTables,
        TableStrategy::StructuredDivs,
    ]);
    list
}

// ── Tests ─────────────────────────────────────────────────────────────────────
