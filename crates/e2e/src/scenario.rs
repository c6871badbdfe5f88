//! Declarative scenario model
//!
//! A scenario is an ordered, immutable list of steps parsed from YAML or
//! assembled with [`ScenarioBuilder`]. Locators and option labels stay opaque
//! strings until execution.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::adapter::{Locator, OptionRef};
use crate::error::{E2eError, E2eResult};
use crate::wait::{PollPolicy, WaitSpec, STATE_CHANGE_TIMEOUT_MS};

/// Parameter reference inside any string field: `${name}`
static PARAM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("parameter pattern is a valid regex")
});

/// Built-in parameter, unique per resolution
pub const RUN_ID_PARAM: &str = "run_id";

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp plus a process-wide sequence number
fn next_run_id() -> String {
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), seq)
}

/// A named verification workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScenarioFile")]
pub struct Scenario {
    name: String,
    description: String,
    tags: Vec<String>,
    params: BTreeMap<String, String>,
    steps: Vec<Step>,
}

/// On-disk shape, validated into a [`Scenario`]
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
    steps: Vec<Step>,
}

impl TryFrom<ScenarioFile> for Scenario {
    type Error = E2eError;

    fn try_from(file: ScenarioFile) -> E2eResult<Self> {
        let scenario = Scenario {
            name: file.name,
            description: file.description,
            tags: file.tags,
            params: file.params,
            steps: file.steps,
        };
        scenario.validate()?;
        Ok(scenario)
    }
}

/// One step: an action, an optional state precondition, and whether a
/// failure halts the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,

    /// Applied to the step's target locator before the action runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitSpec>,

    /// Non-blocking steps record their failure and let the run continue
    #[serde(default = "default_blocking")]
    pub blocking: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn default_blocking() -> bool {
    true
}

/// The closed set of things a step can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Load a URL (relative to the backend's base URL)
    Navigate { url: String },

    Fill { locator: Locator, text: String },

    Click { locator: Locator },

    SelectOption { locator: Locator, option: OptionRef },

    /// Only waits; the state comes from the step's `wait`
    WaitForState { locator: Locator },

    AssertCount {
        locator: Locator,
        #[serde(default)]
        expect: CountExpectation,
        /// Remember the observed count under this key for later `delta` checks
        #[serde(default)]
        capture_as: Option<String>,
        /// Re-evaluate until it holds or the policy's deadline passes
        #[serde(default)]
        within: Option<PollPolicy>,
    },

    AssertText {
        locator: Locator,
        expect: TextExpectation,
        #[serde(default)]
        within: Option<PollPolicy>,
    },

    AssertAttribute {
        locator: Locator,
        name: String,
        expect: AttributeExpectation,
        #[serde(default)]
        within: Option<PollPolicy>,
    },

    /// Click `trigger` and expect a download to start
    Download {
        trigger: Locator,
        #[serde(default)]
        expect_suffix: Option<String>,
        #[serde(default = "default_download_timeout")]
        timeout_ms: u64,
        /// File name under the run's evidence directory to keep the download as
        #[serde(default)]
        save_as: Option<String>,
    },

    Screenshot { name: String },

    /// Attach files to a file input (data restore)
    UploadFiles { locator: Locator, paths: Vec<PathBuf> },

    /// Fail if the page raised uncaught errors so far
    AssertNoPageErrors,
}

fn default_download_timeout() -> u64 {
    STATE_CHANGE_TIMEOUT_MS
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountExpectation {
    /// Only observe (and possibly capture)
    #[default]
    Any,
    Exactly(usize),
    AtLeast(usize),
    /// Captured count `from` plus `by`
    Delta { from: String, by: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextExpectation {
    Equals(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeExpectation {
    Equals(String),
    Contains(String),
    Present,
    Absent,
}

impl Action {
    /// The element the step's `wait` applies to
    pub fn target(&self) -> Option<&Locator> {
        match self {
            Action::Fill { locator, .. }
            | Action::Click { locator }
            | Action::SelectOption { locator, .. }
            | Action::WaitForState { locator }
            | Action::AssertCount { locator, .. }
            | Action::AssertText { locator, .. }
            | Action::AssertAttribute { locator, .. }
            | Action::UploadFiles { locator, .. } => Some(locator),
            Action::Download { trigger, .. } => Some(trigger),
            Action::Navigate { .. } | Action::Screenshot { .. } | Action::AssertNoPageErrors => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Fill { .. } => "fill",
            Action::Click { .. } => "click",
            Action::SelectOption { .. } => "select_option",
            Action::WaitForState { .. } => "wait_for_state",
            Action::AssertCount { .. } => "assert_count",
            Action::AssertText { .. } => "assert_text",
            Action::AssertAttribute { .. } => "assert_attribute",
            Action::Download { .. } => "download",
            Action::Screenshot { .. } => "screenshot",
            Action::UploadFiles { .. } => "upload_files",
            Action::AssertNoPageErrors => "assert_no_page_errors",
        }
    }
}

impl Step {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            wait: None,
            blocking: true,
            label: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(Action::Navigate { url: url.into() })
    }

    pub fn fill(locator: impl Into<Locator>, text: impl Into<String>) -> Self {
        Self::new(Action::Fill { locator: locator.into(), text: text.into() })
    }

    pub fn click(locator: impl Into<Locator>) -> Self {
        Self::new(Action::Click { locator: locator.into() })
    }

    pub fn select(locator: impl Into<Locator>, option: OptionRef) -> Self {
        Self::new(Action::SelectOption { locator: locator.into(), option })
    }

    pub fn wait_for(locator: impl Into<Locator>, spec: WaitSpec) -> Self {
        Self::new(Action::WaitForState { locator: locator.into() }).with_wait(spec)
    }

    pub fn count(locator: impl Into<Locator>, expect: CountExpectation) -> Self {
        Self::new(Action::AssertCount {
            locator: locator.into(),
            expect,
            capture_as: None,
            within: None,
        })
    }

    pub fn screenshot(name: impl Into<String>) -> Self {
        Self::new(Action::Screenshot { name: name.into() })
    }

    pub fn with_wait(mut self, spec: WaitSpec) -> Self {
        self.wait = Some(spec);
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Short human name, e.g. `click:#add-product-btn`
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.action {
            Action::Navigate { url } => format!("navigate:{url}"),
            Action::Screenshot { name } => format!("screenshot:{name}"),
            Action::AssertNoPageErrors => "assert_no_page_errors".to_string(),
            action => match action.target() {
                Some(target) => format!("{}:{}", action.kind(), target),
                None => action.kind().to_string(),
            },
        }
    }
}

impl Scenario {
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            E2eError::ScenarioParse(format!("{}: {}", path.display(), e))
        })
    }

    /// Load all scenarios below a directory, ordered by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.has_tag(tag)).collect()
    }

    /// Substitute every `${name}` in the steps.
    ///
    /// Lookup order is `overrides`, then the scenario's own params, then the
    /// built-in `run_id`. Returns a new scenario; `self` is untouched.
    pub fn resolve(&self, overrides: &BTreeMap<String, String>) -> E2eResult<Scenario> {
        let mut values = self.params.clone();
        values.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
            .entry(RUN_ID_PARAM.to_string())
            .or_insert_with(next_run_id);

        let mut raw = serde_json::to_value(&self.steps)?;
        substitute(&mut raw, &PARAM_PATTERN, &values)?;
        let steps: Vec<Step> = serde_json::from_value(raw)?;

        Ok(Scenario {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            params: values,
            steps,
        })
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::ScenarioParse("scenario name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::ScenarioParse(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }

        let mut captured: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.wait.is_some() && step.action.target().is_none() {
                return Err(E2eError::ScenarioParse(format!(
                    "scenario '{}' step {}: '{}' has no element to wait for",
                    self.name,
                    index,
                    step.action.kind()
                )));
            }
            if let Action::AssertCount { expect, capture_as, .. } = &step.action {
                if let CountExpectation::Delta { from, .. } = expect {
                    if !captured.contains(from.as_str()) {
                        return Err(E2eError::ScenarioParse(format!(
                            "scenario '{}' step {}: delta refers to '{}' before it is captured",
                            self.name, index, from
                        )));
                    }
                }
                if let Some(key) = capture_as {
                    if !captured.insert(key.as_str()) {
                        return Err(E2eError::ScenarioParse(format!(
                            "scenario '{}' step {}: '{}' is captured twice",
                            self.name, index, key
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn substitute(
    value: &mut serde_json::Value,
    pattern: &Regex,
    values: &BTreeMap<String, String>,
) -> E2eResult<()> {
    match value {
        serde_json::Value::String(s) => {
            if let Some(unknown) = pattern
                .captures_iter(s)
                .map(|c| c[1].to_string())
                .find(|name| !values.contains_key(name))
            {
                return Err(E2eError::ScenarioParse(format!("unknown parameter '{unknown}'")));
            }
            let replaced = pattern
                .replace_all(s, |c: &Captures| values[&c[1]].clone())
                .into_owned();
            *s = replaced;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute(item, pattern, values)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, pattern, values)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Programmatic construction of a [`Scenario`]
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    description: String,
    tags: Vec<String>,
    params: BTreeMap<String, String>,
    steps: Vec<Step>,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            params: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn build(self) -> E2eResult<Scenario> {
        Scenario::try_from(ScenarioFile {
            name: self.name,
            description: self.description,
            tags: self.tags,
            params: self.params,
            steps: self.steps,
        })
    }
}
