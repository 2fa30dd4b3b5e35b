//! Portfolio summary page: the stock table and the collapsible funds table.

use super::cascade::{TableStrategy, first_non_empty};
use super::table::{RowFilter, TableLocator};
use super::{Extractor, funds};
use crate::assembler::stamp_origin;
use crate::browser::Locator;
use crate::control::RetryOutcome;
use crate::error::{ExtractError, Result};
use crate::models::{Origin, RowRecord};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PORTFOLIO_PATH: &str = "/carteiras/resumo/";

/// Any of these means the summary page rendered its tables.
const WAIT_SELECTORS: &[&str] = &[
    "#Ticker-tickers_wrapper > div:nth-child(3)",
    "#Ticker-tickers",
    ".table-responsive",
];

const STOCK_NOT_FOUND_EXTRA: Duration = Duration::from_secs(1);
const FUNDS_NOT_FOUND_EXTRA: Duration = Duration::from_secs(2);

/// Stock table strategies, most specific first.
pub fn stock_strategies() -> Vec<TableStrategy> {
    vec![
        TableStrategy::Table(TableLocator::id("Ticker-tickers")),
        TableStrategy::Table(TableLocator::css("#Ticker-tickers_wrapper table#Ticker-tickers")),
        TableStrategy::Table(TableLocator::css("#Ticker-tickers_wrapper table")),
        TableStrategy::Table(TableLocator::css(".table-responsive table")),
        TableStrategy::ScriptScan,
    ]
}

impl Extractor<'_> {
    async fn wait_for_portfolio(&self) -> Result<()> {
        let mut last = ExtractError::Timeout("portfolio tables".into());
        for css in WAIT_SELECTORS {
            match self
                .browser
                .wait_for_element(&Locator::css(*css), self.settings.element_timeout)
                .await
            {
                Ok(_) => {
                    debug!("portfolio page ready ({})", css);
                    return Ok(());
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    async fn open_portfolio(&self) -> Result<()> {
        self.browser.navigate(&self.settings.url(PORTFOLIO_PATH)).await?;
        self.checkpoint()?;
        self.wait_for_portfolio().await
    }

    /// Rows of the stock portfolio table, or an empty collection once every
    /// attempt has failed.
    pub async fn extract_stock_portfolio(&self) -> Vec<RowRecord> {
        self.report("Extraindo carteira de ações...", 65);
        let strategies = stock_strategies();
        let policy = self.settings.retry.clone().with_not_found_extra(STOCK_NOT_FOUND_EXTRA);

        let outcome = self
            .retry(policy)
            .run(
                "carteira de ações",
                Some(70),
                async |_| {
                    self.open_portfolio().await?;
                    self.checkpoint()?;
                    let found = first_non_empty(
                        "carteira",
                        &strategies,
                        self.cancel,
                        self.status,
                        Some(75),
                        async |s: &TableStrategy| s.run(self.browser, RowFilter::All).await,
                    )
                    .await?;
                    if found.is_empty() {
                        return Err(ExtractError::NotFound("Todas as estratégias de extração falharam".into()));
                    }
                    Ok(found.rows)
                },
                async || self.recover_session().await,
            )
            .await;

        debug!("stock portfolio settled after {} attempt(s)", outcome.attempts());
        match outcome {
            RetryOutcome::Succeeded { value, .. } => {
                info!("stock portfolio: {} row(s)", value.len());
                self.report(&format!("Carteira de ações: {} registros extraídos.", value.len()), 85);
                stamp_origin(value, Origin::PortfolioStock)
            }
            RetryOutcome::Exhausted { error, .. } => {
                warn!("stock portfolio unavailable: {}", error);
                self.report("Não foi possível extrair dados da carteira de ações.", 85);
                Vec::new()
            }
            RetryOutcome::Cancelled { .. } => Vec::new(),
        }
    }

    /// Rows of the funds portfolio table. Reuses the summary page when it is
    /// already open, expanding the collapsed section first.
    pub async fn extract_funds_portfolio(&self) -> Vec<RowRecord> {
        self.report("Extraindo carteira de FIIs...", 85);
        let policy = self.settings.retry.clone().with_not_found_extra(FUNDS_NOT_FOUND_EXTRA);

        let outcome = self
            .retry(policy)
            .run(
                "carteira de FIIs",
                Some(86),
                async |_| {
                    if !self.browser.current_url().await?.contains("carteiras/resumo") {
                        self.open_portfolio().await?;
                    }
                    self.checkpoint()?;
                    let expansion = funds::expand_section(self.browser, self.status).await?;
                    debug!("funds section: {:?}", expansion);
                    self.checkpoint()?;

                    let table = funds::locate_table(self.browser, self.status)
                        .await?
                        .ok_or_else(|| ExtractError::NotFound("Tabela de FIIs não encontrada".into()))?;
                    let strategies = funds::strategies(&table);
                    let found = first_non_empty(
                        "FIIs",
                        &strategies,
                        self.cancel,
                        self.status,
                        Some(88),
                        async |s: &TableStrategy| s.run(self.browser, RowFilter::Relevant).await,
                    )
                    .await?;
                    if found.is_empty() {
                        return Err(ExtractError::NotFound("Todas as estratégias de extração de FIIs falharam".into()));
                    }
                    Ok(found.rows)
                },
                async || self.recover_session().await,
            )
            .await;

        debug!("funds portfolio settled after {} attempt(s)", outcome.attempts());
        match outcome {
            RetryOutcome::Succeeded { value, .. } => {
                info!("funds portfolio: {} row(s)", value.len());
                self.report(&format!("Carteira de FIIs: {} registros extraídos.", value.len()), 90);
                stamp_origin(value, Origin::PortfolioFund)
            }
            RetryOutcome::Exhausted { error, .. } => {
                warn!("funds portfolio unavailable: {}", error);
                self.report("Não foi possível extrair dados da carteira de FIIs.", 90);
                Vec::new()
            }
            RetryOutcome::Cancelled { .. } => Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::RemoteBrowser;
    use crate::browser::snapshot::SnapshotBrowser;
    use crate::control::CancellationToken;
    use crate::control::status::RecordingStatus;
    use crate::extract::ExtractSettings;
    use crate::models::ExtractionTarget;

    const BASE: &str = "https://site.test";

    const SUMMARY: &str = r#"
        <div class="section-actives">
          <div id="Ticker-tickers_wrapper">
            <div class="toolbar"></div>
            <table id="Ticker-tickers">
              <tr><th>Ativo</th><th>Quantidade</th></tr>
              <tr><td>PETR4</td><td>100</td></tr>
              <tr><td>VALE3</td><td>50</td></tr>
            </table>
          </div>
          <div class="header" onclick="MyWallets.toogleClass('#ToggleFii', 'hidden')"><h4>FIIs</h4></div>
          <div id="ToggleFii" style="display:none">
            <table id="Fii-tickers">
              <thead><tr><th>Ativo</th><th>Cotas</th></tr></thead>
              <tbody>
                <tr><td>HGLG11</td><td>12</td></tr>
                <tr><td> </td><td></td></tr>
              </tbody>
            </table>
          </div>
        </div>
    "#;

    fn summary_site(html: &str) -> SnapshotBrowser {
        SnapshotBrowser::new()
            .with_page(&format!("{BASE}/"), "<h1>Investidor10</h1>")
            .with_page(&format!("{BASE}{PORTFOLIO_PATH}"), html)
    }

    #[tokio::test(start_paused = true)]
    async fn test_portfolio_stocks_then_collapsed_funds() {
        let b = summary_site(SUMMARY);
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let stocks = ex.extract(&ExtractionTarget::PortfolioStocks, None).await;
        assert_eq!(
            stocks,
            vec![
                RowRecord::new().with("Ativo", "PETR4").with("Quantidade", "100").with("Origin", "PortfolioStock"),
                RowRecord::new().with("Ativo", "VALE3").with("Quantidade", "50").with("Origin", "PortfolioStock"),
            ]
        );
        assert!(status.contains("Tentando estratégia carteira 1..."));
        assert!(!status.contains("Tentando estratégia carteira 2..."));

        let funds = ex.extract(&ExtractionTarget::PortfolioFunds, None).await;
        assert_eq!(
            funds,
            vec![RowRecord::new().with("Ativo", "HGLG11").with("Cotas", "12").with("Origin", "PortfolioFund")]
        );
        assert!(status.contains("Clicando para expandir seção de FIIs"));
        assert!(status.contains("Tabela de FIIs encontrada com seletor: #Fii-tickers"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_funds_navigate_when_elsewhere() {
        let b = summary_site(SUMMARY);
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        b.navigate(&format!("{BASE}/")).await.unwrap();
        let funds = ex.extract_funds_portfolio().await;
        assert_eq!(funds.len(), 1);
        assert!(b.current_url().await.unwrap().contains("carteiras/resumo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrapper_fallback_and_exhaustion() {
        let b = summary_site(
            r#"<div class="table-responsive"><table>
                 <tr><th>Código</th><th>Preço</th></tr><tr><td>WEGE3</td><td>36,20</td></tr>
               </table></div>"#,
        );
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let stocks = ex.extract_stock_portfolio().await;
        assert_eq!(stocks[0].get("Código"), Some("WEGE3"));
        assert!(status.contains("Tentando estratégia carteira 4..."));

        let funds = ex.extract_funds_portfolio().await;
        assert!(funds.is_empty());
        assert!(status.contains("Tentativa 1 falhou para carteira de FIIs"));
        assert!(status.contains("Não foi possível extrair dados da carteira de FIIs."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_summary_page_degrades_to_empty() {
        let b = SnapshotBrowser::new();
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        assert!(ex.extract_stock_portfolio().await.is_empty());
        assert!(status.contains("Não foi possível extrair dados da carteira de ações."));
        assert_eq!(status.last_percent(), Some(85));
    }
}
