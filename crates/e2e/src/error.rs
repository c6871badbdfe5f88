//! Error types for scenario execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::Locator;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(Locator),

    #[error("Timeout after {waited_ms} ms waiting for: {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("No download after clicking {trigger} (waited {waited_ms} ms)")]
    NoDownload { trigger: String, waited_ms: u64 },

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Scenario error: {0}")]
    ScenarioParse(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Stable tag for an error, recorded in step results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Navigation,
    ElementNotFound,
    Timeout,
    AssertionFailed,
    NoDownload,
    Backend,
    Scenario,
    Cancelled,
    Io,
}

impl E2eError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::Navigation(_) => ErrorKind::Navigation,
            E2eError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            E2eError::Timeout { .. } => ErrorKind::Timeout,
            E2eError::AssertionFailed(_) => ErrorKind::AssertionFailed,
            E2eError::NoDownload { .. } => ErrorKind::NoDownload,
            E2eError::PlaywrightNotFound | E2eError::Playwright(_) | E2eError::Http(_) => {
                ErrorKind::Backend
            }
            E2eError::ScenarioParse(_) | E2eError::Yaml(_) | E2eError::Toml(_) => {
                ErrorKind::Scenario
            }
            E2eError::Cancelled => ErrorKind::Cancelled,
            E2eError::Io(_) | E2eError::Json(_) => ErrorKind::Io,
        }
    }
}
