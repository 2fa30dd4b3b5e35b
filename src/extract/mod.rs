//! Extraction engine: selector resolution, table parsing and the strategy
//! cascades, threaded through one [`Extractor`] context that carries the
//! browser, the status sink and the cancellation token.

pub mod cascade;
pub mod entity;
pub mod funds;
pub mod portfolio;
pub mod selector;
pub mod table;

use crate::browser::RemoteBrowser;
use crate::config::AppConfig;
use crate::control::{CancellationToken, RetryController, RetryOutcome, RetryPolicy, StatusSink};
use crate::error::{ExtractError, Result};
use crate::models::{Category, ExtractionTarget, RowRecord};
use selector::SelectorResolver;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Site and timing parameters for one run.
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub base_url: String,
    pub element_timeout: Duration,
    pub cell_timeout: Duration,
    pub restart_pause: Duration,
    pub await_login: bool,
    pub retry: RetryPolicy,
}

impl ExtractSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.browser.site().to_string(),
            element_timeout: cfg.browser.element_timeout(),
            cell_timeout: cfg.browser.cell_timeout(),
            restart_pause: cfg.browser.restart_pause(),
            await_login: cfg.browser.awaits_login(),
            retry: RetryPolicy::from_config(&cfg.retry),
        }
    }

    /// Saved pages: no login, no waiting between attempts.
    pub fn offline(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            element_timeout: Duration::from_millis(100),
            cell_timeout: Duration::from_millis(100),
            restart_pause: Duration::ZERO,
            await_login: false,
            retry: RetryPolicy::immediate(3),
        }
    }

    /// `path` must start with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn entity_url(&self, category: Category, ticker: &str) -> String {
        self.url(&format!("/{}/{}/", category.path_segment(), ticker))
    }
}

pub struct Extractor<'a> {
    browser: &'a dyn RemoteBrowser,
    settings: ExtractSettings,
    status: &'a dyn StatusSink,
    cancel: &'a CancellationToken,
}

impl<'a> Extractor<'a> {
    pub fn new(
        browser: &'a dyn RemoteBrowser,
        settings: ExtractSettings,
        status: &'a dyn StatusSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            browser,
            settings,
            status,
            cancel,
        }
    }

    pub fn resolver(&self) -> SelectorResolver<'a> {
        SelectorResolver::new(self.browser, self.settings.cell_timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report(&self, message: &str, percent: u8) {
        self.status.report(message, Some(percent));
    }

    fn retry(&self, policy: RetryPolicy) -> RetryController<'_> {
        RetryController::new(policy, self.cancel, self.status)
    }

    /// Bail out between sub-steps once cancellation is requested.
    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Open the site root under retry and, in a visible session, wait for
    /// the operator to log in.
    ///
    /// Only a configuration problem or a dead session that cannot be
    /// recreated is an error. A home page that keeps timing out is reported
    /// and the run goes on; cancellation returns `Ok` for the caller to observe.
    pub async fn open_site(&self) -> Result<()> {
        self.report("Acessando o site Investidor10...", 20);
        let home = self.settings.url("/");

        let outcome = self
            .retry(self.settings.retry.clone())
            .run(
                "site",
                Some(20),
                async |_| self.browser.navigate(&home).await,
                async || self.reopen_session().await,
            )
            .await;

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => debug!("site opened after {} attempt(s)", attempts),
            RetryOutcome::Cancelled { .. } => return Ok(()),
            RetryOutcome::Exhausted { error, .. }
                if matches!(error, ExtractError::Config(_) | ExtractError::Transport(_)) =>
            {
                return Err(error);
            }
            RetryOutcome::Exhausted { error, attempts } => {
                warn!("home page unavailable after {} attempt(s): {}", attempts, error);
                self.report("Página inicial não carregou, continuando com as extrações...", 20);
            }
        }

        if self.is_cancelled() {
            return Ok(());
        }
        self.await_login().await?;
        self.report("Login confirmado, iniciando extrações...", 25);
        Ok(())
    }

    async fn await_login(&self) -> Result<()> {
        if !self.settings.await_login {
            return Ok(());
        }
        self.report(
            "Faça login no site Investidor10 e pressione Enter para continuar com a extração.",
            20,
        );
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| ExtractError::Config(format!("cannot read confirmation from stdin: {e}")))?;
        Ok(())
    }

    /// Close, pause, reopen.
    async fn reopen_session(&self) -> Result<()> {
        warn!("browser session lost, recreating it");
        if let Err(e) = self.browser.close().await {
            warn!("closing broken session failed: {}", e);
        }
        tokio::time::sleep(self.settings.restart_pause).await;
        self.browser.open().await
    }

    /// Close, pause, reopen, re-navigate and re-login.
    pub async fn recover_session(&self) -> Result<()> {
        self.reopen_session().await?;
        self.browser.navigate(&self.settings.url("/")).await?;
        self.await_login().await?;
        info!("browser session recreated");
        Ok(())
    }

    /// Rows for one target. Entity targets yield a single row; an empty
    /// result means cancellation or, for portfolios, nothing found.
    /// `percent` tags the retry messages of entity targets; portfolio targets
    /// report their own fixed progress.
    pub async fn extract(&self, target: &ExtractionTarget<'_>, percent: Option<u8>) -> Vec<RowRecord> {
        match target {
            ExtractionTarget::Entity {
                category,
                ticker,
                columns,
            } => self
                .extract_entity(*category, ticker, columns, percent)
                .await
                .into_iter()
                .collect(),
            ExtractionTarget::PortfolioStocks => self.extract_stock_portfolio().await,
            ExtractionTarget::PortfolioFunds => self.extract_funds_portfolio().await,
        }
    }
}
