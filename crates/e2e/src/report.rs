//! Run reports and the evidence sink

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult, ErrorKind};

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// Not executed because an earlier blocking step failed or the run was cancelled
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&E2eError> for StepError {
    fn from(err: &E2eError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A captured artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub path: PathBuf,
    pub sha256: String,
}

impl Evidence {
    /// Hash an artifact the backend has written
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let data = std::fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(Self {
            path: path.to_path_buf(),
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

/// Result of executing (or skipping) one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub index: usize,
    pub step: String,
    pub outcome: StepOutcome,
    pub blocking: bool,
    pub duration_ms: u64,
    /// Observed value, e.g. a row count or element text
    pub captured: Option<serde_json::Value>,
    pub evidence: Option<Evidence>,
    pub error: Option<StepError>,
}

impl ExecutionResult {
    pub fn skipped(index: usize, step: String, blocking: bool) -> Self {
        Self {
            index,
            step,
            outcome: StepOutcome::Skipped,
            blocking,
            duration_ms: 0,
            captured: None,
            evidence: None,
            error: None,
        }
    }
}

/// Everything that happened during one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: String,
    pub passed: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<ExecutionResult>,
    /// Uncaught page errors observed during the run
    pub page_errors: Vec<String>,
    /// Failed non-blocking steps
    pub warnings: usize,
    /// Set when the run could not start at all
    pub error: Option<StepError>,
}

impl RunReport {
    /// First failing blocking step, which is what regressed
    pub fn first_failure(&self) -> Option<&ExecutionResult> {
        self.results
            .iter()
            .find(|r| r.outcome == StepOutcome::Failed && r.blocking)
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// Collects step results and names evidence files for one run.
///
/// Evidence paths depend only on scenario name, step index and label, so a
/// later run overwrites an earlier run's files for the same step.
#[derive(Debug)]
pub struct EvidenceSink {
    scenario: String,
    dir: PathBuf,
    started_at: DateTime<Utc>,
    results: Vec<ExecutionResult>,
}

impl EvidenceSink {
    pub fn new(root: &Path, scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            dir: root.join(slug(scenario)),
            started_at: Utc::now(),
            results: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<root>/<scenario>/<NN>-<label>.png`, directory created on demand
    pub fn evidence_path(&self, index: usize, label: &str) -> E2eResult<PathBuf> {
        self.artifact_path(&format!("{:02}-{}.png", index, slug(label)))
    }

    /// A file of arbitrary name inside this run's evidence directory
    pub fn artifact_path(&self, file_name: &str) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(self.dir.join(file_name))
    }

    pub fn record(&mut self, result: ExecutionResult) {
        debug!(
            scenario = %self.scenario,
            step = %result.step,
            outcome = ?result.outcome,
            "step recorded"
        );
        self.results.push(result);
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    /// Close the run. A run passes when no blocking step failed and it was
    /// not cancelled.
    pub fn finalize(self, page_errors: Vec<String>, cancelled: bool) -> RunReport {
        let warnings = self
            .results
            .iter()
            .filter(|r| r.outcome == StepOutcome::Failed && !r.blocking)
            .count();
        let blocking_failure = self
            .results
            .iter()
            .any(|r| r.outcome == StepOutcome::Failed && r.blocking);
        let duration_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;

        RunReport {
            scenario: self.scenario,
            passed: !blocking_failure && !cancelled,
            cancelled,
            started_at: self.started_at,
            duration_ms,
            results: self.results,
            page_errors,
            warnings,
            error: None,
        }
    }

    /// Close a run that never got to execute, e.g. because no browser
    /// session could be opened
    pub fn abort(self, err: &E2eError) -> RunReport {
        let cancelled = matches!(err, E2eError::Cancelled);
        let mut report = self.finalize(Vec::new(), cancelled);
        report.passed = false;
        report.error = Some(StepError::from(err));
        report
    }
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub runs: Vec<RunReport>,
}

impl SuiteReport {
    pub fn from_runs(runs: Vec<RunReport>, duration_ms: u64) -> Self {
        let passed = runs.iter().filter(|r| r.passed).count();
        Self {
            total: runs.len(),
            passed,
            failed: runs.len() - passed,
            duration_ms,
            runs,
        }
    }

    /// Write `suite-report.json` into `dir`
    pub fn write_json(&self, dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("suite-report.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Lowercase, filesystem-safe form of a name
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "step".to_string()
    } else {
        trimmed.to_string()
    }
}
