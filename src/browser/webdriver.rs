//! Live Chrome session over W3C WebDriver (chromedriver), via fantoccini.

use super::{ElementHandle, Locator, PageScript, RemoteBrowser};
use crate::config::BrowserConfig;
use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Scripts ───────────────────────────────────────────────────────────────────

const QUERY_TEXTS_JS: &str = r#"
const out = {};
for (const sel of arguments[0]) {
  try {
    const el = document.querySelector(sel);
    out[sel] = el ? (el.innerText || el.textContent || '').trim() : 'N/A';
  } catch (e) {
    out[sel] = 'N/A';
  }
}
return out;
"#;

const READ_TABLE_JS: &str = r#"
const table = arguments[0];
if (!table || table.tagName !== 'TABLE') return [];
const rows = Array.from(table.rows);
if (!rows.length) return [];
const text = c => (c.innerText || c.textContent || '').trim();
const dataCells = r => Array.from(r.cells).filter(c => c.tagName === 'TD');
let headers = Array.from(rows[0].cells).map(text);
const start = headers.length ? 1 : 0;
if (!headers.length) {
  const widest = Math.max(0, ...rows.map(r => dataCells(r).length));
  headers = Array.from({ length: widest }, () => '');
}
headers = headers.map((h, i) => h || `Coluna ${i + 1}`);
const out = [];
for (const row of rows.slice(start)) {
  const rec = {};
  dataCells(row).forEach((c, i) => {
    const t = text(c);
    if (t && i < headers.length) rec[headers[i]] = t;
  });
  if (Object.keys(rec).length) out.push(rec);
}
return out;
"#;

const SCAN_TABLES_JS: &str = r#"
const text = c => (c.innerText || c.textContent || '').trim();
for (const table of document.querySelectorAll('table')) {
  const rows = Array.from(table.rows);
  if (rows.length <= 1) continue;
  const headers = Array.from(rows[0].cells).map((c, i) => text(c) || `Coluna ${i + 1}`);
  const data = [];
  for (const row of rows.slice(1)) {
    const cells = Array.from(row.cells).filter(c => c.tagName === 'TD');
    if (!cells.length) continue;
    const rec = {};
    cells.slice(0, headers.length).forEach((c, i) => { rec[headers[i]] = text(c); });
    data.push(rec);
  }
  if (data.length) return data;
}
return [];
"#;

const CLICK_JS: &str = "arguments[0].click(); return null;";

// ── Session ───────────────────────────────────────────────────────────────────

/// Chrome capabilities for a session built from `cfg`.
pub fn capabilities(cfg: &BrowserConfig) -> Map<String, Value> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--window-size={}", cfg.window_size),
        format!("--user-agent={}", cfg.user_agent),
    ];
    if cfg.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }

    let mut caps = Map::new();
    caps.insert(
        "goog:chromeOptions".to_string(),
        json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
            "useAutomationExtension": false,
        }),
    );
    caps
}

fn map_cmd(err: CmdError) -> ExtractError {
    if err.is_no_such_element() {
        ExtractError::NotFound(err.to_string())
    } else {
        ExtractError::from_driver_message(err.to_string())
    }
}

fn to_driver_locator(locator: &Locator) -> String {
    match locator {
        Locator::Css(css) => css.clone(),
        other => other.to_css(),
    }
}

pub struct WebDriverBrowser {
    cfg: BrowserConfig,
    client: Mutex<Option<Client>>,
    elements: Mutex<HashMap<String, Element>>,
    generation: AtomicU64,
    next_key: AtomicU64,
}

impl WebDriverBrowser {
    /// Open a session against `cfg.webdriver_url`.
    pub async fn connect(cfg: &BrowserConfig) -> Result<Self> {
        let client = Self::start_session(cfg).await?;
        Ok(Self {
            cfg: cfg.clone(),
            client: Mutex::new(Some(client)),
            elements: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            next_key: AtomicU64::new(0),
        })
    }

    async fn start_session(cfg: &BrowserConfig) -> Result<Client> {
        debug!("Connecting to WebDriver at {}", cfg.webdriver_url);
        let client = ClientBuilder::native()
            .capabilities(capabilities(cfg))
            .connect(&cfg.webdriver_url)
            .await
            .map_err(|e| ExtractError::Transport(format!("cannot start browser session: {e}")))?;
        info!("WebDriver session opened (headless={})", cfg.headless);
        Ok(client)
    }

    fn client_slot(&self) -> MutexGuard<'_, Option<Client>> {
        self.client.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Element>> {
        self.elements.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn client(&self) -> Result<Client> {
        self.client_slot()
            .clone()
            .ok_or_else(|| ExtractError::Transport("browser session closed".into()))
    }

    /// Drop every registered element and reject the handles issued so far.
    fn invalidate_handles(&self) {
        self.registry().clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn register(&self, element: Element) -> ElementHandle {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed).to_string();
        self.registry().insert(key.clone(), element);
        ElementHandle::new(self.generation.load(Ordering::Acquire), key)
    }

    fn element(&self, handle: &ElementHandle) -> Result<Element> {
        let current = self.generation.load(Ordering::Acquire);
        if handle.generation != current {
            return Err(ExtractError::NotFound(format!(
                "stale element handle {} (generation {} < {})",
                handle.key, handle.generation, current
            )));
        }
        self.registry()
            .get(&handle.key)
            .cloned()
            .ok_or_else(|| ExtractError::NotFound(format!("unknown element handle {}", handle.key)))
    }

    fn element_arg(&self, handle: &ElementHandle) -> Result<Value> {
        serde_json::to_value(self.element(handle)?).map_err(|e| ExtractError::Script(e.to_string()))
    }

    async fn execute(&self, source: &str, args: Vec<Value>) -> Result<Value> {
        self.client()?.execute(source, args).await.map_err(map_cmd)
    }
}

#[async_trait]
impl RemoteBrowser for WebDriverBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("goto {}", url);
        let client = self.client()?;
        self.invalidate_handles();
        client.goto(url).await.map_err(map_cmd)
    }

    async fn wait_for_element(&self, locator: &Locator, timeout: Duration) -> Result<ElementHandle> {
        let css = to_driver_locator(locator);
        let element = self
            .client()?
            .wait()
            .at_most(timeout)
            .for_element(fantoccini::Locator::Css(&css))
            .await
            .map_err(|e| match map_cmd(e) {
                ExtractError::Transport(m) => ExtractError::Transport(m),
                ExtractError::MalformedSelector(m) => ExtractError::MalformedSelector(m),
                other => ExtractError::Timeout(format!("{locator} not present after {timeout:?}: {other}")),
            })?;
        Ok(self.register(element))
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let css = to_driver_locator(locator);
        let found = self
            .client()?
            .find_all(fantoccini::Locator::Css(&css))
            .await
            .map_err(map_cmd)?;
        Ok(found.into_iter().map(|e| self.register(e)).collect())
    }

    async fn find_within(&self, parent: &ElementHandle, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let css = to_driver_locator(locator);
        let found = self
            .element(parent)?
            .find_all(fantoccini::Locator::Css(&css))
            .await
            .map_err(map_cmd)?;
        Ok(found.into_iter().map(|e| self.register(e)).collect())
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        let text = self.element(element)?.text().await.map_err(map_cmd)?;
        Ok(text.trim().to_string())
    }

    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool> {
        self.element(element)?.is_displayed().await.map_err(map_cmd)
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.element(element)?.attr(name).await.map_err(map_cmd)
    }

    async fn evaluate(&self, script: &PageScript) -> Result<Value> {
        debug!("evaluate {}", script.name());
        match script {
            PageScript::QueryTexts(selectors) => self.execute(QUERY_TEXTS_JS, vec![json!(selectors)]).await,
            PageScript::ReadTable(table) => {
                let arg = self.element_arg(table)?;
                self.execute(READ_TABLE_JS, vec![arg]).await
            }
            PageScript::ScanTables => self.execute(SCAN_TABLES_JS, Vec::new()).await,
            PageScript::Click(target) => {
                let arg = self.element_arg(target)?;
                self.execute(CLICK_JS, vec![arg]).await
            }
        }
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.client()?.current_url().await.map_err(map_cmd)?.to_string())
    }

    async fn close(&self) -> Result<()> {
        self.invalidate_handles();
        let old = self.client_slot().take();
        match old {
            Some(client) => client.close().await.map_err(map_cmd),
            None => Ok(()),
        }
    }

    async fn open(&self) -> Result<()> {
        let old = self.client_slot().take();
        if let Some(client) = old {
            if let Err(e) = client.close().await {
                warn!("closing previous session failed: {}", e);
            }
        }
        self.invalidate_handles();

        let client = Self::start_session(&self.cfg).await?;
        *self.client_slot() = Some(client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_capabilities_follow_config() {
        let mut cfg = AppConfig::default().browser;
        cfg.headless = true;
        cfg.window_size = "1366,768".into();

        let caps = capabilities(&cfg);
        let opts = &caps["goog:chromeOptions"];
        let args: Vec<&str> = opts["args"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
        assert!(args.contains(&"--headless=new"));
        assert!(args.contains(&"--window-size=1366,768"));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
        assert_eq!(opts["excludeSwitches"], json!(["enable-automation"]));
        assert_eq!(opts["useAutomationExtension"], json!(false));
    }

    #[test]
    fn test_visible_session_has_no_headless_flag() {
        let cfg = AppConfig::default().browser;
        let caps = capabilities(&cfg);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a.as_str().is_some_and(|s| s.starts_with("--headless"))));
    }

    #[test]
    fn test_locators_render_as_css() {
        assert_eq!(to_driver_locator(&Locator::id("Fii-tickers")), "[id=\"Fii-tickers\"]");
        assert_eq!(to_driver_locator(&Locator::tag("body")), "body");
        assert_eq!(to_driver_locator(&Locator::css("#a > td")), "#a > td");
    }
}
