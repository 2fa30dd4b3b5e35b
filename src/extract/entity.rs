//! Per-ticker pages: one row per requested entity, never a batch abort.

use super::Extractor;
use crate::assembler::{assemble, assemble_error};
use crate::browser::Locator;
use crate::control::RetryOutcome;
use crate::error::ExtractError;
use crate::models::{Category, ColumnDefinition, ExtractionTarget, RowRecord};
use crate::utils::progress_between;
use tracing::{info, warn};

/// Marker stored under `Erro` when the entity page never became usable.
pub const PAGE_NOT_LOADED: &str = "Página não carregou";

fn entity_error_message(error: &ExtractError) -> String {
    match error {
        ExtractError::Timeout(_) | ExtractError::NotFound(_) | ExtractError::Transport(_) => {
            PAGE_NOT_LOADED.to_string()
        }
        other => other.to_string(),
    }
}

impl Extractor<'_> {
    /// Scrape every ticker of `category`, reporting progress linearly across
    /// `span`. Stops early on cancellation, keeping the rows gathered so far.
    pub async fn extract_entities(
        &self,
        category: Category,
        tickers: &[String],
        columns: &[ColumnDefinition],
        span: (u8, u8),
    ) -> Vec<RowRecord> {
        let plural = match category {
            Category::Stocks => "ações",
            Category::Funds => "FIIs",
        };
        let (from, to) = span;
        let mut rows = Vec::with_capacity(tickers.len());
        if tickers.is_empty() {
            return rows;
        }
        self.report(&format!("Iniciando extração de dados de {plural}..."), from);

        for (i, ticker) in tickers.iter().enumerate() {
            if self.is_cancelled() {
                self.report(&format!("Extração de {plural} cancelada pelo usuário."), 0);
                return rows;
            }
            let percent = progress_between(from, to, i, tickers.len());
            self.report(
                &format!(
                    "Processando {} {} ({}/{})...",
                    category.display_name(),
                    ticker,
                    i + 1,
                    tickers.len()
                ),
                percent,
            );
            let target = ExtractionTarget::Entity {
                category,
                ticker,
                columns,
            };
            let found = self.extract(&target, Some(percent)).await;
            if found.is_empty() {
                self.report(&format!("Extração de {plural} cancelada pelo usuário."), 0);
                return rows;
            }
            rows.extend(found);
        }

        self.report(&format!("Extração de dados de {plural} concluída."), to);
        rows
    }

    /// One entity row. `None` only when cancelled.
    pub async fn extract_entity(
        &self,
        category: Category,
        ticker: &str,
        columns: &[ColumnDefinition],
        percent: Option<u8>,
    ) -> Option<RowRecord> {
        let url = self.settings.entity_url(category, ticker);
        let resolver = self.resolver();
        let body = Locator::tag("body");

        let outcome = self
            .retry(self.settings.retry.clone())
            .run(
                ticker,
                percent,
                async |attempt| {
                    info!("{} {}: attempt {} at {}", category.display_name(), ticker, attempt, url);
                    self.browser.navigate(&url).await?;
                    self.checkpoint()?;
                    self.browser.wait_for_element(&body, self.settings.element_timeout).await?;
                    Ok(resolver.resolve_columns(columns).await)
                },
                async || self.recover_session().await,
            )
            .await;

        let origin = category.origin();
        match outcome {
            RetryOutcome::Succeeded { value, .. } => Some(assemble(ticker, origin, value)),
            RetryOutcome::Exhausted { error, attempts } => {
                warn!("{} {} failed after {} attempt(s): {}", category.display_name(), ticker, attempts, error);
                self.status.report(
                    &format!("Erro ao processar {} {}: {}", category.display_name(), ticker, error),
                    percent,
                );
                Some(assemble_error(ticker, origin, &entity_error_message(&error)))
            }
            RetryOutcome::Cancelled { .. } => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::snapshot::SnapshotBrowser;
    use crate::browser::RemoteBrowser;
    use crate::control::CancellationToken;
    use crate::control::status::RecordingStatus;
    use crate::extract::ExtractSettings;

    const BASE: &str = "https://site.test";

    const PETR4: &str = r#"
        <div class="_card pl"><span class="_card-header">P/L</span><span class="_card-body"><span>4,21</span></span></div>
        <div class="_card dy"><span class="_card-body">11,3%</span></div>
        <div id="cards-ticker"><div class="cotacao"><span class="value">R$ 38,10</span></div></div>
    "#;

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::simple("P/L", "pl", "_card-body"),
            ColumnDefinition::simple("DY", "dy", "_card-body"),
            ColumnDefinition::advanced("Cotação", "#cards-ticker .cotacao .value"),
        ]
    }

    fn site() -> SnapshotBrowser {
        SnapshotBrowser::new()
            .with_page(&format!("{BASE}/"), "<h1>Investidor10</h1>")
            .with_page(&format!("{BASE}/acoes/PETR4/"), PETR4)
    }

    #[tokio::test]
    async fn test_missing_page_becomes_error_row_and_batch_continues() {
        let b = site();
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let tickers = vec!["XYZ4".to_string(), "PETR4".to_string()];
        let rows = ex.extract_entities(Category::Stocks, &tickers, &columns(), (30, 45)).await;

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            RowRecord::new()
                .with("Ticker", "XYZ4")
                .with("Origin", "Stock")
                .with("Erro", "Página não carregou")
        );
        assert_eq!(rows[1].get("P/L"), Some("4,21"));
        assert_eq!(rows[1].get("DY"), Some("11,3%"));
        assert_eq!(rows[1].get("Cotação"), Some("R$ 38,10"));
        assert_eq!(rows[1].get("Erro"), None);

        assert!(status.contains("Tentativa 2 falhou para XYZ4"));
        assert!(!status.contains("Tentativa 3 falhou"));
        assert!(status.contains("Processando ação PETR4 (2/2)..."));
        assert_eq!(status.last_percent(), Some(45));
    }

    #[tokio::test]
    async fn test_fund_pages_use_their_own_path_and_origin() {
        let b = SnapshotBrowser::new().with_page(
            &format!("{BASE}/fiis/HGLG11/"),
            r#"<div class="_card vp"><span class="_card-body">R$ 160,02</span></div>"#,
        );
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let row = ex
            .extract_entity(Category::Funds, "HGLG11", &[ColumnDefinition::simple("VP", "vp", "_card-body")], None)
            .await
            .unwrap();
        assert_eq!(row.get("Origin"), Some("Fund"));
        assert_eq!(row.get("VP"), Some("R$ 160,02"));
    }

    #[tokio::test]
    async fn test_transport_failure_recreates_session() {
        let b = site();
        b.fail_navigations([ExtractError::Transport("invalid session id".into())]);
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let row = ex.extract_entity(Category::Stocks, "PETR4", &columns(), None).await.unwrap();
        assert_eq!(b.opens(), 1);
        assert_eq!(row.get("P/L"), Some("4,21"));
        assert!(status.contains("Tentando reinicializar o navegador..."));
    }

    #[tokio::test]
    async fn test_failed_recreation_becomes_error_row() {
        let b = site();
        b.fail_navigations([ExtractError::Transport("chrome not reachable".into())]);
        b.fail_opens(1);
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let tickers = vec!["PETR4".to_string(), "PETR4".to_string()];
        let rows = ex.extract_entities(Category::Stocks, &tickers, &columns(), (30, 45)).await;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Erro"), Some(PAGE_NOT_LOADED));
        assert_eq!(rows[0].get("P/L"), None);
        assert!(status.contains("Erro ao processar ação PETR4"));

        // the next ticker finds the session closed and reopens it
        assert_eq!(rows[1].get("P/L"), Some("4,21"));
        assert_eq!(b.opens(), 1);
    }

    #[tokio::test]
    async fn test_entity_target_dispatch() {
        let b = site();
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let cols = columns();
        let target = ExtractionTarget::Entity {
            category: Category::Stocks,
            ticker: "PETR4",
            columns: &cols,
        };
        let rows = ex.extract(&target, Some(40)).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Origin"), Some(target.origin().label()));
        assert_eq!(rows[0].get("Cotação"), Some("R$ 38,10"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_no_calls() {
        let b = site();
        let status = RecordingStatus::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ex = Extractor::new(&b, ExtractSettings::offline(BASE), &status, &cancel);

        let rows = ex
            .extract_entities(Category::Stocks, &["PETR4".to_string()], &columns(), (30, 45))
            .await;
        assert!(rows.is_empty());
        assert_eq!(b.calls(), 0);
        assert!(status.contains("cancelada pelo usuário"));
        assert_eq!(status.last_percent(), Some(0));
        assert_eq!(b.current_url().await.unwrap(), "about:blank");
    }
}
