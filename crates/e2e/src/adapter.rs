//! Browser capability adapter: the narrow set of UI primitives the executor drives
//!
//! Every read goes to the live page; adapters never cache DOM state between
//! calls. One adapter instance owns one browser session for the lifetime of
//! one run.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::wait::{ElementProbe, Poller, WaitSpec};

/// Structural reference to one or more elements of the rendered UI.
///
/// Locators are opaque to the engine; only the backend interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(selector: &str) -> Self {
        Self::new(selector)
    }
}

/// Which `<option>` of a select to pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionRef {
    Label(String),
    Value(String),
    Index(usize),
}

impl fmt::Display for OptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionRef::Label(label) => write!(f, "label={label}"),
            OptionRef::Value(value) => write!(f, "value={value}"),
            OptionRef::Index(index) => write!(f, "index={index}"),
        }
    }
}

/// A download observed after a trigger action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub suggested_filename: String,
    #[serde(default)]
    pub saved_to: Option<PathBuf>,
}

/// Primitive UI operations over some browser-automation backend.
///
/// Operations on a locator that matches nothing fail with
/// [`E2eError::ElementNotFound`]; operations against an unreachable page fail
/// with [`E2eError::Navigation`].
#[async_trait]
pub trait BrowserAdapter: Send {
    /// Load a URL; relative URLs are resolved by the backend against its base
    async fn navigate(&mut self, url: &str) -> E2eResult<()>;

    async fn fill(&mut self, locator: &Locator, text: &str) -> E2eResult<()>;

    async fn click(&mut self, locator: &Locator) -> E2eResult<()>;

    async fn select_option(&mut self, locator: &Locator, option: &OptionRef) -> E2eResult<()>;

    /// Observe the locator once. Never fails for zero matches.
    async fn probe(&mut self, locator: &Locator) -> E2eResult<ElementProbe>;

    /// Poll [`probe`](Self::probe) until the locator reaches the wanted state.
    ///
    /// A probe that completes after the deadline fails with `Timeout` even
    /// when it saw the wanted state.
    async fn wait_for(&mut self, locator: &Locator, spec: &WaitSpec) -> E2eResult<()> {
        let mut poller = Poller::start(&spec.policy);
        loop {
            if self.probe(locator).await?.satisfies(spec.state) {
                if poller.expired() {
                    return Err(poller.timed_out(format!(
                        "{locator} to be {} (reached only after the deadline)",
                        spec.state
                    )));
                }
                return Ok(());
            }
            if !poller.next_attempt().await {
                return Err(poller.timed_out(format!("{locator} to be {}", spec.state)));
            }
        }
    }

    async fn read_text(&mut self, locator: &Locator) -> E2eResult<String>;

    /// `Ok(None)` when the element exists but has no such attribute
    async fn read_attribute(&mut self, locator: &Locator, name: &str) -> E2eResult<Option<String>>;

    async fn count(&mut self, locator: &Locator) -> E2eResult<usize>;

    /// Click `trigger` and wait for the download it starts.
    ///
    /// Fails with [`E2eError::NoDownload`] if none begins within `timeout_ms`.
    async fn expect_download(
        &mut self,
        trigger: &Locator,
        timeout_ms: u64,
        save_to: Option<&Path>,
    ) -> E2eResult<DownloadInfo>;

    /// Attach local files to a file input
    async fn set_input_files(&mut self, locator: &Locator, paths: &[PathBuf]) -> E2eResult<()>;

    async fn screenshot(&mut self, dest: &Path) -> E2eResult<()>;

    /// Drain uncaught page errors observed since the previous call
    async fn take_page_errors(&mut self) -> E2eResult<Vec<String>>;
}

/// Opens a fresh, exclusively owned session for each scenario run
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserAdapter;

    async fn open(&self) -> E2eResult<Self::Session>;

    async fn close(&self, session: Self::Session) -> E2eResult<()>;
}

/// Fail with `ElementNotFound` unless the locator matched something
pub fn require_match(locator: &Locator, count: usize) -> E2eResult<()> {
    if count == 0 {
        Err(E2eError::ElementNotFound(locator.clone()))
    } else {
        Ok(())
    }
}
