//! Playwright browser automation
//!
//! A session is one long-lived `node` process running an embedded bridge
//! script. Requests and responses are single JSON lines over stdin/stdout:
//!
//! ```text
//! -> {"id": 7, "op": "click", "selector": "#add-product-btn"}
//! <- {"id": 7, "ok": true, "value": null}
//! <- {"id": 8, "ok": false, "kind": "not_found", "message": "#missing"}
//! ```

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};

use crate::adapter::{BrowserAdapter, DownloadInfo, Locator, OptionRef, SessionFactory};
use crate::error::{E2eError, E2eResult};
use crate::wait::ElementProbe;

/// Slack on top of the bridge's own timeouts before the Rust side gives up
const REQUEST_MARGIN: Duration = Duration::from_secs(5);

/// Browser launch and first page
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

const BRIDGE_JS: &str = r#"
const readline = require('readline');
const pw = require(require.resolve('playwright', { paths: [process.cwd()] }));
const cfg = JSON.parse(process.argv[2]);

const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');
const fail = (kind, message) => { const e = new Error(message); e.kind = kind; throw e; };

(async () => {
  const browser = await pw[cfg.browser].launch({ headless: cfg.headless });
  const context = await browser.newContext({
    viewport: { width: cfg.width, height: cfg.height },
    acceptDownloads: true,
  });
  const page = await context.newPage();
  page.setDefaultTimeout(cfg.actionTimeout);

  const pageErrors = [];
  page.on('pageerror', (err) => pageErrors.push(String((err && err.message) || err)));
  if (cfg.acceptDialogs) {
    page.on('dialog', (dialog) => dialog.accept().catch(() => {}));
  }

  const first = async (selector) => {
    const loc = page.locator(selector);
    if ((await loc.count()) === 0) fail('not_found', selector);
    return loc.first();
  };

  const handlers = {
    navigate: async (r) => {
      try {
        await page.goto(new URL(r.url, cfg.baseUrl).toString());
      } catch (e) {
        fail('navigation', e.message);
      }
    },
    fill: async (r) => (await first(r.selector)).fill(r.text),
    click: async (r) => (await first(r.selector)).click(),
    select: async (r) => {
      const o = r.option;
      const arg = 'index' in o ? { index: o.index } : 'label' in o ? { label: o.label } : { value: o.value };
      await (await first(r.selector)).selectOption(arg);
    },
    probe: async (r) => {
      const loc = page.locator(r.selector);
      const count = await loc.count();
      const visible = count > 0 && (await loc.first().isVisible());
      return { count, visible };
    },
    text: async (r) => (await (await first(r.selector)).textContent()) || '',
    attribute: async (r) => (await first(r.selector)).getAttribute(r.name),
    count: async (r) => page.locator(r.selector).count(),
    download: async (r) => {
      const trigger = await first(r.selector);
      let download;
      try {
        [download] = await Promise.all([
          page.waitForEvent('download', { timeout: r.timeout }),
          trigger.click(),
        ]);
      } catch (e) {
        if (e.name === 'TimeoutError') fail('no_download', e.message);
        throw e;
      }
      let saved = null;
      if (r.saveTo) {
        await download.saveAs(r.saveTo);
        saved = r.saveTo;
      }
      return { suggested_filename: download.suggestedFilename(), saved_to: saved };
    },
    upload: async (r) => (await first(r.selector)).setInputFiles(r.paths),
    screenshot: async (r) => { await page.screenshot({ path: r.path, fullPage: true }); },
    page_errors: async () => pageErrors.splice(0),
    close: async () => { await browser.close(); },
  };

  send({ ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    const req = JSON.parse(line);
    try {
      const value = await handlers[req.op](req);
      send({ id: req.id, ok: true, value: value === undefined ? null : value });
    } catch (e) {
      const kind = e.kind || (e.name === 'TimeoutError' ? 'timeout' : 'error');
      send({ id: req.id, ok: false, kind, message: String((e && e.message) || e) });
    }
    if (req.op === 'close') break;
  }
  process.exit(0);
})().catch((e) => {
  send({ ready: false, message: String((e && e.message) || e) });
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Playwright(format!("unsupported browser: {other}"))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Directory whose `node_modules` provides `playwright`
    pub working_dir: PathBuf,
    /// Accept `confirm()`/`alert()` dialogs automatically
    pub accept_dialogs: bool,
    /// Upper bound for a single browser action
    pub action_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            working_dir: PathBuf::from("."),
            accept_dialogs: true,
            action_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    ready: Option<bool>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// One browser page driven through the bridge
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    action_timeout_ms: u64,
    // Holds the bridge script for the lifetime of the process
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSession {
    /// Check if Playwright is installed
    pub fn check_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Start the bridge and open a page
    pub async fn launch(config: &PlaywrightConfig) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_JS)?;

        let bridge_config = json!({
            "baseUrl": config.base_url,
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "width": config.viewport_width,
            "height": config.viewport_height,
            "acceptDialogs": config.accept_dialogs,
            "actionTimeout": config.action_timeout_ms,
        });

        debug!("Launching Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .arg(bridge_config.to_string())
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("failed to spawn node: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdout unavailable".into()))?;

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            action_timeout_ms: config.action_timeout_ms,
            _script_dir: script_dir,
        };

        let hello = tokio::time::timeout(LAUNCH_TIMEOUT, session.read_message())
            .await
            .map_err(|_| E2eError::Playwright("browser launch timed out".into()))??;
        if hello.ready != Some(true) {
            return Err(E2eError::Playwright(format!(
                "browser launch failed: {}",
                hello.message.unwrap_or_default()
            )));
        }

        info!(
            "Playwright {} session ready (base {})",
            config.browser.as_str(),
            config.base_url
        );
        Ok(session)
    }

    /// Ask the bridge to close the browser, then reap the process
    pub async fn close(mut self) -> E2eResult<()> {
        let budget = Duration::from_millis(self.action_timeout_ms) + REQUEST_MARGIN;
        if let Err(e) = self.request("close", json!({}), budget).await {
            warn!("Playwright bridge did not close cleanly: {}", e);
        }
        match tokio::time::timeout(REQUEST_MARGIN, self.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                self.child.kill().await?;
            }
        }
        Ok(())
    }

    async fn read_message(&mut self) -> E2eResult<BridgeMessage> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| E2eError::Playwright("bridge exited unexpectedly".into()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(message) => return Ok(message),
                // Anything the page's console leaks onto stdout
                Err(_) => debug!("bridge: {}", line),
            }
        }
    }

    async fn request(&mut self, op: &str, mut payload: Value, budget: Duration) -> E2eResult<Value> {
        self.next_id += 1;
        let id = self.next_id;
        payload["id"] = json!(id);
        payload["op"] = json!(op);

        let mut line = payload.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let response = tokio::time::timeout(budget, async {
            loop {
                let message = self.read_message().await?;
                // Late answers to requests that already timed out on our side
                if message.id == Some(id) {
                    return Ok::<_, E2eError>(message);
                }
            }
        })
        .await
        .map_err(|_| E2eError::Timeout {
            what: format!("bridge response to '{op}'"),
            waited_ms: budget.as_millis() as u64,
        })??;

        if response.ok {
            return Ok(response.value);
        }

        let message = response.message.unwrap_or_default();
        let target = payload["selector"].as_str().unwrap_or_default().to_string();
        Err(match response.kind.as_deref() {
            Some("navigation") => E2eError::Navigation(message),
            Some("not_found") => E2eError::ElementNotFound(Locator::new(target)),
            Some("timeout") => E2eError::Timeout {
                what: format!("{op} {target}"),
                waited_ms: self.action_timeout_ms,
            },
            Some("no_download") => E2eError::NoDownload {
                trigger: target,
                waited_ms: payload["timeout"].as_u64().unwrap_or_default(),
            },
            _ => E2eError::Playwright(format!("{op}: {message}")),
        })
    }

    async fn action(&mut self, op: &str, payload: Value) -> E2eResult<Value> {
        let budget = Duration::from_millis(self.action_timeout_ms) + REQUEST_MARGIN;
        self.request(op, payload, budget).await
    }
}

#[async_trait]
impl BrowserAdapter for PlaywrightSession {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        self.action("navigate", json!({ "url": url })).await.map(|_| ())
    }

    async fn fill(&mut self, locator: &Locator, text: &str) -> E2eResult<()> {
        self.action("fill", json!({ "selector": locator.as_str(), "text": text }))
            .await
            .map(|_| ())
    }

    async fn click(&mut self, locator: &Locator) -> E2eResult<()> {
        self.action("click", json!({ "selector": locator.as_str() }))
            .await
            .map(|_| ())
    }

    async fn select_option(&mut self, locator: &Locator, option: &OptionRef) -> E2eResult<()> {
        self.action("select", json!({ "selector": locator.as_str(), "option": option }))
            .await
            .map(|_| ())
    }

    async fn probe(&mut self, locator: &Locator) -> E2eResult<ElementProbe> {
        let value = self.action("probe", json!({ "selector": locator.as_str() })).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn read_text(&mut self, locator: &Locator) -> E2eResult<String> {
        let value = self.action("text", json!({ "selector": locator.as_str() })).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn read_attribute(&mut self, locator: &Locator, name: &str) -> E2eResult<Option<String>> {
        let value = self
            .action("attribute", json!({ "selector": locator.as_str(), "name": name }))
            .await?;
        Ok(value.as_str().map(String::from))
    }

    async fn count(&mut self, locator: &Locator) -> E2eResult<usize> {
        let value = self.action("count", json!({ "selector": locator.as_str() })).await?;
        Ok(value.as_u64().unwrap_or_default() as usize)
    }

    async fn expect_download(
        &mut self,
        trigger: &Locator,
        timeout_ms: u64,
        save_to: Option<&Path>,
    ) -> E2eResult<DownloadInfo> {
        let budget = Duration::from_millis(timeout_ms + self.action_timeout_ms) + REQUEST_MARGIN;
        let value = self
            .request(
                "download",
                json!({
                    "selector": trigger.as_str(),
                    "timeout": timeout_ms,
                    "saveTo": save_to,
                }),
                budget,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn set_input_files(&mut self, locator: &Locator, paths: &[PathBuf]) -> E2eResult<()> {
        self.action("upload", json!({ "selector": locator.as_str(), "paths": paths }))
            .await
            .map(|_| ())
    }

    async fn screenshot(&mut self, dest: &Path) -> E2eResult<()> {
        self.action("screenshot", json!({ "path": dest })).await.map(|_| ())
    }

    async fn take_page_errors(&mut self) -> E2eResult<Vec<String>> {
        let value = self.action("page_errors", json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Opens one browser per scenario run
#[derive(Debug, Clone)]
pub struct PlaywrightFactory {
    config: PlaywrightConfig,
}

impl PlaywrightFactory {
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        PlaywrightSession::check_installed()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }
}

#[async_trait]
impl SessionFactory for PlaywrightFactory {
    type Session = PlaywrightSession;

    async fn open(&self) -> E2eResult<PlaywrightSession> {
        PlaywrightSession::launch(&self.config).await
    }

    async fn close(&self, session: PlaywrightSession) -> E2eResult<()> {
        session.close().await
    }
}
