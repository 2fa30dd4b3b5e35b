//! Pipeline orchestrator: site → entity pages → portfolio → export.
//!
//! ## Steps
//!
//!   1. Open the site (and wait for login in a visible session)
//!   2. Stock pages, then fund pages: one row per configured ticker
//!   3. Portfolio summary: stock table, then the collapsible funds table
//!   4. Hand the named collections to a [`SheetWriter`]
//!
//! Cancellation stops at the next step boundary; whatever was collected is
//! still exported.

use crate::assembler::Dataset;
use crate::browser::RemoteBrowser;
use crate::config::AppConfig;
use crate::control::{CancellationToken, StatusSink};
use crate::export::{SheetWriter, export_dataset};
use crate::extract::{ExtractSettings, Extractor};
use crate::models::{Category, ExtractionTarget, Origin};
use anyhow::{Context, Result};
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Scrape everything configured. Only a dead session or a configuration
    /// error while opening the site is an error; every other failure degrades
    /// inside the dataset.
    pub async fn collect(&self, extractor: &Extractor<'_>) -> Result<Dataset> {
        let extraction = &self.config.extraction;
        let mut data = Dataset::default();

        if extractor.is_cancelled() {
            return Ok(data);
        }
        extractor.open_site().await.context("cannot open the site")?;

        // ── 1. Entity pages ───────────────────────────────────────────────────
        info!("=== Entity pages: {} stock(s), {} fund(s) ===", extraction.stocks.len(), extraction.funds.len());
        let stocks = extractor
            .extract_entities(Category::Stocks, &extraction.stocks, &extraction.stock_columns, (30, 45))
            .await;
        data.extend(Origin::Stock, stocks);

        if !extractor.is_cancelled() {
            let funds = extractor
                .extract_entities(Category::Funds, &extraction.funds, &extraction.fund_columns, (45, 60))
                .await;
            data.extend(Origin::Fund, funds);
        }

        // ── 2. Portfolio ──────────────────────────────────────────────────────
        if extraction.portfolio && !extractor.is_cancelled() {
            info!("=== Portfolio summary ===");
            for target in [ExtractionTarget::PortfolioStocks, ExtractionTarget::PortfolioFunds] {
                if extractor.is_cancelled() {
                    break;
                }
                let rows = extractor.extract(&target, None).await;
                data.extend(target.origin(), rows);
            }
        }

        Ok(data)
    }

    /// Full run: collect, then write every non-empty sheet.
    pub async fn execute(
        &self,
        browser: &dyn RemoteBrowser,
        settings: ExtractSettings,
        status: &dyn StatusSink,
        cancel: &CancellationToken,
        writer: &mut dyn SheetWriter,
    ) -> Result<PipelineStats> {
        let extractor = Extractor::new(browser, settings, status, cancel);
        let data = self.collect(&extractor).await?;

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("run cancelled, exporting {} partial row(s)", data.len());
            status.report("Extração cancelada pelo usuário.", Some(0));
        } else {
            status.report("Processando dados extraídos...", Some(95));
        }

        let sheets = export_dataset(writer, &data).context("export failed")?;

        let stats = PipelineStats {
            stocks: data.stocks.len(),
            funds: data.funds.len(),
            portfolio_stocks: data.portfolio_stocks.len(),
            portfolio_funds: data.portfolio_funds.len(),
            errors: data.error_count(),
            sheets,
            cancelled,
        };
        if !cancelled {
            status.report("Extração concluída com sucesso!", Some(100));
        }

        info!(
            "=== Done: {} stock(s) | {} fund(s) | {} + {} portfolio row(s) | {} error(s) | {} sheet(s) ===",
            stats.stocks, stats.funds, stats.portfolio_stocks, stats.portfolio_funds, stats.errors, stats.sheets,
        );
        Ok(stats)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub stocks: usize,
    pub funds: usize,
    pub portfolio_stocks: usize,
    pub portfolio_funds: usize,
    pub errors: usize,
    pub sheets: usize,
    pub cancelled: bool,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::snapshot::SnapshotBrowser;
    use crate::control::status::RecordingStatus;
    use crate::error::ExtractError;
    use crate::models::{ColumnDefinition, RowRecord};

    const BASE: &str = "https://site.test";

    #[derive(Default)]
    struct MemorySheets(Vec<(String, Vec<RowRecord>)>);

    impl SheetWriter for MemorySheets {
        fn write_sheet(&mut self, name: &str, rows: &[&RowRecord]) -> Result<()> {
            self.0.push((name.to_string(), rows.iter().map(|r| (*r).clone()).collect()));
            Ok(())
        }
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.extraction.stocks = vec!["PETR4".into(), "XYZ4".into()];
        cfg.extraction.funds = vec!["HGLG11".into()];
        cfg.extraction.stock_columns = vec![ColumnDefinition::simple("P/L", "pl", "_card-body")];
        cfg.extraction.fund_columns = vec![ColumnDefinition::advanced("P/VP", "#cards-ticker .pvp")];
        cfg
    }

    fn site() -> SnapshotBrowser {
        SnapshotBrowser::new()
            .with_page(&format!("{BASE}/"), "<h1>Investidor10</h1>")
            .with_page(
                &format!("{BASE}/acoes/PETR4/"),
                r#"<div class="_card pl"><span class="_card-body">4,21</span></div>"#,
            )
            .with_page(
                &format!("{BASE}/fiis/HGLG11/"),
                r#"<div id="cards-ticker"><span class="pvp">1,02</span></div>"#,
            )
            .with_page(
                &format!("{BASE}/carteiras/resumo/"),
                r#"<div class="section-actives">
                     <table id="Ticker-tickers">
                       <tr><th>Ativo</th><th>Quantidade</th></tr>
                       <tr><td>PETR4</td><td>100</td></tr>
                     </table>
                     <div class="header" onclick="MyWallets.toogleClass('#ToggleFii', 'hidden')">FIIs</div>
                     <div id="ToggleFii" hidden>
                       <table id="Fii-tickers"><tr><th>Ativo</th></tr><tr><td>HGLG11</td></tr></table>
                     </div>
                   </div>"#,
            )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_exports_both_sheets() {
        let b = site();
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let mut sheets = MemorySheets::default();

        let stats = Pipeline::new(config())
            .execute(&b, ExtractSettings::offline(BASE), &status, &cancel, &mut sheets)
            .await
            .unwrap();

        assert_eq!(
            stats,
            PipelineStats {
                stocks: 2,
                funds: 1,
                portfolio_stocks: 1,
                portfolio_funds: 1,
                errors: 1,
                sheets: 2,
                cancelled: false,
            }
        );
        assert_eq!(sheets.0[0].0, "Acoes");
        let entity_rows = &sheets.0[0].1;
        assert_eq!(entity_rows[0].get("P/L"), Some("4,21"));
        assert_eq!(entity_rows[1].get("Erro"), Some("Página não carregou"));
        assert_eq!(entity_rows[2].get("P/VP"), Some("1,02"));
        assert_eq!(sheets.0[1].1[1].get("Origin"), Some("PortfolioFund"));

        assert!(status.contains("Acessando o site Investidor10..."));
        assert_eq!(status.last_percent(), Some(100));
    }

    #[tokio::test]
    async fn test_cancelled_run_exports_nothing_and_reports_zero() {
        let b = site();
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sheets = MemorySheets::default();

        let stats = Pipeline::new(config())
            .execute(&b, ExtractSettings::offline(BASE), &status, &cancel, &mut sheets)
            .await
            .unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.sheets, 0);
        assert_eq!(b.calls(), 0);
        assert_eq!(status.last_percent(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_run_keeps_partial_rows() {
        let b = site();
        let cancel = CancellationToken::new();
        let status = |msg: &str, _: Option<u8>| {
            if msg.starts_with("Extração de dados de ações concluída") {
                cancel.cancel();
            }
        };
        let mut sheets = MemorySheets::default();

        let stats = Pipeline::new(config())
            .execute(&b, ExtractSettings::offline(BASE), &status, &cancel, &mut sheets)
            .await
            .unwrap();

        assert!(stats.cancelled);
        assert_eq!((stats.stocks, stats.funds, stats.portfolio_stocks), (2, 0, 0));
        assert_eq!(sheets.0.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_home_page_is_retried() {
        let b = site();
        b.fail_navigations([ExtractError::Timeout("home did not load".into())]);
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let mut sheets = MemorySheets::default();

        let stats = Pipeline::new(config())
            .execute(&b, ExtractSettings::offline(BASE), &status, &cancel, &mut sheets)
            .await
            .unwrap();

        assert!(status.contains("Tentativa 1 falhou para site"));
        assert!(status.contains("Login confirmado"));
        assert_eq!((stats.stocks, stats.funds), (2, 1));
        assert_eq!(sheets.0[0].1[0].get("P/L"), Some("4,21"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_home_page_does_not_stop_entities() {
        let b = SnapshotBrowser::new().with_page(
            &format!("{BASE}/acoes/PETR4/"),
            r#"<div class="_card pl"><span class="_card-body">4,21</span></div>"#,
        );
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let mut sheets = MemorySheets::default();

        let stats = Pipeline::new(config())
            .execute(&b, ExtractSettings::offline(BASE), &status, &cancel, &mut sheets)
            .await
            .unwrap();

        assert!(status.contains("Página inicial não carregou"));
        assert_eq!(sheets.0[0].1[0].get("P/L"), Some("4,21"));
        assert_eq!(stats.portfolio_stocks, 0);
    }

    #[tokio::test]
    async fn test_dead_session_that_cannot_reopen_is_fatal() {
        let b = site();
        b.fail_navigations([ExtractError::Transport("chrome not reachable".into())]);
        b.fail_opens(1);
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let mut sheets = MemorySheets::default();

        let err = Pipeline::new(config())
            .execute(&b, ExtractSettings::offline(BASE), &status, &cancel, &mut sheets)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("cannot open the site"));
        assert!(sheets.0.is_empty());
    }
}
