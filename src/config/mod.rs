use crate::models::{ColumnDefinition, ColumnKind};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Remote browser session and site settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(default)]
    pub headless: bool,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `width,height`
    #[serde(default = "default_window_size")]
    pub window_size: String,

    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,

    #[serde(default = "default_cell_timeout_secs")]
    pub cell_timeout_secs: u64,

    #[serde(default = "default_restart_pause_ms")]
    pub restart_pause_ms: u64,

    #[serde(default = "default_true")]
    pub wait_for_login: bool,
}

/// Per-operation retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    #[serde(default)]
    pub delay_step_ms: u64,

    #[serde(default)]
    pub jitter_ms: u64,
}

/// What to scrape
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub stocks: Vec<String>,

    #[serde(default)]
    pub funds: Vec<String>,

    #[serde(default)]
    pub stock_columns: Vec<ColumnDefinition>,

    #[serde(default)]
    pub fund_columns: Vec<ColumnDefinition>,

    #[serde(default = "default_true")]
    pub portfolio: bool,
}

/// Spreadsheet output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_file_stem")]
    pub file_stem: String,

    /// Append a `_YYYYmmdd_HHMMSS` stamp to the file stem
    #[serde(default)]
    pub timestamped: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}
fn default_base_url() -> String {
    "https://investidor10.com.br".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}
fn default_window_size() -> String {
    "1920,1080".to_string()
}
fn default_element_timeout_secs() -> u64 {
    10
}
fn default_cell_timeout_secs() -> u64 {
    3
}
fn default_restart_pause_ms() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    2000
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_file_stem() -> String {
    "investidor10".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: false,
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            window_size: default_window_size(),
            element_timeout_secs: default_element_timeout_secs(),
            cell_timeout_secs: default_cell_timeout_secs(),
            restart_pause_ms: default_restart_pause_ms(),
            wait_for_login: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            delay_step_ms: 0,
            jitter_ms: 0,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            stocks: Vec::new(),
            funds: Vec::new(),
            stock_columns: Vec::new(),
            fund_columns: Vec::new(),
            portfolio: true,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_stem: default_file_stem(),
            timestamped: false,
        }
    }
}

impl BrowserConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn cell_timeout(&self) -> Duration {
        Duration::from_secs(self.cell_timeout_secs)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }

    /// Base URL without a trailing slash.
    pub fn site(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Login is awaited only in a visible session.
    pub fn awaits_login(&self) -> bool {
        self.wait_for_login && !self.headless
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("I10")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Invalid configuration ({}), using defaults", e);
            AppConfig::default()
        });
        app_cfg.normalize();
        Ok(app_cfg)
    }

    /// Trim, uppercase and deduplicate tickers; first occurrence wins.
    pub fn normalize(&mut self) {
        self.extraction.stocks = normalize_tickers(&self.extraction.stocks);
        self.extraction.funds = normalize_tickers(&self.extraction.funds);
    }

    /// Column problems, one human-readable line each. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (set, columns) in [
            ("stock_columns", &self.extraction.stock_columns),
            ("fund_columns", &self.extraction.fund_columns),
        ] {
            problems.extend(validate_columns(columns).into_iter().map(|p| format!("{set}: {p}")));
        }
        for (key, value) in [
            ("browser.base_url", &self.browser.base_url),
            ("browser.webdriver_url", &self.browser.webdriver_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                problems.push(format!("{key}: invalid URL '{value}' ({e})"));
            }
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        problems
    }
}

fn normalize_tickers(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

pub fn validate_columns(columns: &[ColumnDefinition]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut names = HashSet::new();
    for col in columns {
        if col.name.trim().is_empty() {
            problems.push("column with empty name".to_string());
        } else if !names.insert(col.name.as_str()) {
            problems.push(format!("duplicate column '{}'", col.name));
        }
        if let Some(problem) = col.problem() {
            let kind = match col.kind {
                ColumnKind::Simple => "simple",
                ColumnKind::Advanced => "advanced",
            };
            problems.push(format!("{} column '{}': {}", kind, col.name, problem));
        }
    }
    problems
}
