//! Command line of the scenario harness binary

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};

use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::playwright::Browser;

#[derive(Parser, Debug)]
#[command(name = "uiflow-e2e")]
#[command(about = "Browser scenario runner")]
pub struct HarnessArgs {
    /// Actually drive a browser; otherwise only validate scenario files
    #[arg(long, env = "UIFLOW_E2E", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    pub live: bool,

    /// Runner configuration file (TOML); defaults apply when absent
    #[arg(short, long, default_value = "uiflow.toml")]
    pub config: PathBuf,

    /// Path to scenarios directory
    #[arg(short, long)]
    pub scenarios: Option<PathBuf>,

    /// Run only scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Base URL of the application under test
    #[arg(long)]
    pub base_url: Option<String>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Scenarios to run concurrently
    #[arg(short, long)]
    pub parallelism: Option<usize>,

    /// Screenshot after every step
    #[arg(long)]
    pub checkpoints: bool,

    /// Parameter override, repeatable: --param customer="Alice Smith"
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for screenshots and downloads
    #[arg(long)]
    pub evidence: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Test filters and flags that `cargo test` forwards; ignored
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub passthrough: Vec<String>,
}

/// Split a `NAME=VALUE` override
pub fn parse_param(raw: &str) -> E2eResult<(String, String)> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| E2eError::ScenarioParse(format!("expected NAME=VALUE, got '{raw}'")))
}

impl HarnessArgs {
    /// Layer command-line settings over a loaded configuration
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(dir) = &self.scenarios {
            config.scenarios_dir = dir.clone();
        }
        if let Some(url) = &self.base_url {
            config.playwright.base_url = url.clone();
        }
        if let Some(browser) = self.browser {
            config.playwright.browser = browser;
        }
        if self.headed {
            config.playwright.headless = false;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if self.checkpoints {
            config.checkpoint_screenshots = true;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(evidence) = &self.evidence {
            config.evidence_dir = evidence.clone();
        }
        config.params.extend(self.params.iter().cloned());
    }
}
