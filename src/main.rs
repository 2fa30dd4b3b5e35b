mod assembler;
mod browser;
mod config;
mod control;
mod error;
mod export;
mod extract;
mod models;
mod pipeline;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::assembler::Dataset;
use crate::browser::RemoteBrowser;
use crate::browser::snapshot::SnapshotBrowser;
use crate::browser::webdriver::WebDriverBrowser;
use crate::config::AppConfig;
use crate::control::status::RecordingStatus;
use crate::control::{CancellationToken, StatusSink, TracingStatus};
use crate::export::{CsvWorkbook, export_dataset};
use crate::extract::portfolio::PORTFOLIO_PATH;
use crate::extract::selector::SelectorResolver;
use crate::extract::table::{RowFilter, TableLocator, try_parse_table};
use crate::extract::{ExtractSettings, Extractor};
use crate::models::{ColumnDefinition, NOT_AVAILABLE, Origin};
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "i10-extract", about = "Investidor10 fundamentals and portfolio extractor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape configured tickers and the portfolio through a live browser
    Run {
        /// Run Chrome without a window (skips the login wait)
        #[arg(long, env = "I10_HEADLESS")]
        headless: bool,

        /// Skip the portfolio summary page
        #[arg(long)]
        no_portfolio: bool,

        /// Directory for the CSV sheets
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse one table of a saved page and print it as JSON
    Table {
        file: PathBuf,

        #[arg(long, conflicts_with = "selector")]
        id: Option<String>,

        #[arg(long)]
        selector: Option<String>,

        /// Drop rows whose cells are all empty
        #[arg(long)]
        relevant: bool,
    },

    /// Run the portfolio cascades against a saved summary page and export them
    Portfolio {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve one selector, or a search/return class pair, against a saved page
    Resolve {
        file: PathBuf,

        #[arg(required_unless_present = "search_class")]
        selector: Option<String>,

        #[arg(long, requires = "return_class")]
        search_class: Option<String>,

        #[arg(long)]
        return_class: Option<String>,
    },

    /// Print the effective configuration and its problems
    Check,
}

/// Serve a saved page under `url` and open it.
async fn open_saved(url: &str, file: &Path) -> Result<SnapshotBrowser> {
    let browser = SnapshotBrowser::new().with_file(url, file)?;
    browser
        .navigate(url)
        .await
        .with_context(|| format!("cannot open {:?}", file))?;
    Ok(browser)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "i10_extractor=info,warn",
        1 => "i10_extractor=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    for problem in config.validate() {
        warn!("config: {}", problem);
    }

    match cli.command {
        Command::Run {
            headless,
            no_portfolio,
            output,
        } => {
            let _t = utils::Timer::start("Extraction run");
            config.browser.headless |= headless;
            config.extraction.portfolio &= !no_portfolio;
            if let Some(dir) = output {
                config.export.output_dir = dir;
            }

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, stopping after the current step");
                    on_ctrl_c.cancel();
                }
            });

            let status = RecordingStatus::new();
            status.report("Iniciando navegador...", Some(10));
            let browser = WebDriverBrowser::connect(&config.browser)
                .await
                .context("cannot start the browser session")?;

            let columns = config.extraction.stock_columns.iter().chain(&config.extraction.fund_columns);
            let mut book = CsvWorkbook::new(&config.export, columns);
            let settings = ExtractSettings::from_config(&config);
            let result = Pipeline::new(config.clone())
                .execute(&browser, settings, &status, &cancel, &mut book)
                .await;

            if let Err(e) = browser.close().await {
                warn!("browser did not close cleanly: {}", e);
            }
            let stats = result?;
            for file in book.files() {
                println!("{}", file.display());
            }
            let retried = status.messages().iter().filter(|m| m.starts_with("Tentativa ")).count();
            info!(
                "Done at {}%: {} entity row(s), {} portfolio row(s), {} error(s), {} retried attempt(s){}",
                status.last_percent().unwrap_or(0),
                stats.stocks + stats.funds,
                stats.portfolio_stocks + stats.portfolio_funds,
                stats.errors,
                retried,
                if stats.cancelled { " (cancelled)" } else { "" }
            );
        }

        Command::Table {
            file,
            id,
            selector,
            relevant,
        } => {
            let url = format!("{}/", config.browser.site());
            let browser = open_saved(&url, &file).await?;
            let locator = match (id, selector) {
                (Some(id), _) => TableLocator::Id(id),
                (None, Some(css)) => TableLocator::Css(css),
                (None, None) => TableLocator::Auto,
            };
            let filter = if relevant { RowFilter::Relevant } else { RowFilter::All };
            let rows = try_parse_table(&browser, &locator, filter)
                .await
                .with_context(|| format!("no table for {locator}"))?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Command::Portfolio { file, output } => {
            let _t = utils::Timer::start("Offline portfolio");
            let site = config.browser.site().to_string();
            let browser = open_saved(&format!("{site}{PORTFOLIO_PATH}"), &file).await?;

            let status = TracingStatus;
            let cancel = CancellationToken::new();
            let extractor = Extractor::new(&browser, ExtractSettings::offline(&site), &status, &cancel);
            let mut data = Dataset::default();
            data.extend(Origin::PortfolioStock, extractor.extract_stock_portfolio().await);
            data.extend(Origin::PortfolioFund, extractor.extract_funds_portfolio().await);

            let mut book = CsvWorkbook::new(&config.export, std::iter::empty());
            if let Some(dir) = output {
                book = book.with_dir(dir);
            }
            let sheets = export_dataset(&mut book, &data)?;
            for file in book.files() {
                println!("{}", file.display());
            }
            info!(
                "Done: {} stock row(s), {} fund row(s), {} sheet(s)",
                data.portfolio_stocks.len(),
                data.portfolio_funds.len(),
                sheets
            );
        }

        Command::Resolve {
            file,
            selector,
            search_class,
            return_class,
        } => {
            let url = format!("{}/", config.browser.site());
            let browser = open_saved(&url, &file).await?;
            let resolver = SelectorResolver::new(&browser, config.browser.cell_timeout());
            let value = match (search_class, return_class, selector) {
                (Some(search), Some(ret), _) => {
                    resolver
                        .resolve(&ColumnDefinition::simple("valor", &search, &ret))
                        .await
                }
                (_, _, Some(css)) => resolver.resolve_selector(&css).await,
                _ => NOT_AVAILABLE.to_string(),
            };
            println!("{value}");
        }

        Command::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration OK.");
            } else {
                println!("{} problem(s):", problems.len());
                for p in &problems {
                    println!("  {p}");
                }
            }
        }
    }

    Ok(())
}
