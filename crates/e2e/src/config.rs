//! Runner configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;
use crate::wait::PollPolicy;

/// Configuration for the suite runner, loadable from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory searched recursively for `*.yaml` scenarios
    pub scenarios_dir: PathBuf,

    /// Where `suite-report.json` is written
    pub output_dir: PathBuf,

    /// Root for screenshots and downloads, one subdirectory per scenario
    pub evidence_dir: PathBuf,

    /// Scenarios run concurrently, each on its own browser session
    pub parallelism: usize,

    /// Screenshot after every successful step, not only on failure
    pub checkpoint_screenshots: bool,

    /// How long to wait for the app under test to answer before running anything
    pub preflight: Option<PollPolicy>,

    /// Parameter overrides applied to every scenario
    pub params: BTreeMap<String, String>,

    pub playwright: PlaywrightConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            scenarios_dir: PathBuf::from("crates/e2e/scenarios"),
            output_dir: PathBuf::from("test-results"),
            evidence_dir: PathBuf::from("test-results/evidence"),
            parallelism: 1,
            checkpoint_screenshots: false,
            preflight: Some(PollPolicy::render()),
            params: BTreeMap::new(),
            playwright: PlaywrightConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| E2eError::ScenarioParse(format!("cannot encode config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.parallelism == 0 {
            return Err(E2eError::ScenarioParse("parallelism must be at least 1".into()));
        }
        if self.playwright.base_url.trim().is_empty() {
            return Err(E2eError::ScenarioParse("playwright.base_url is empty".into()));
        }
        Ok(())
    }
}
