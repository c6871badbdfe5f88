//! Scenario executor and the suite runner built on it

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::adapter::{BrowserAdapter, Locator, SessionFactory};
use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::preflight::wait_until_reachable;
use crate::report::{
    Evidence, EvidenceSink, ExecutionResult, RunReport, StepError, StepOutcome, SuiteReport,
};
use crate::scenario::{
    Action, AttributeExpectation, CountExpectation, Scenario, Step, TextExpectation,
};
use crate::wait::{PollPolicy, Poller, WaitSpec};

/// Lifecycle of one executor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// What a successful step leaves behind
#[derive(Debug, Default)]
struct StepDone {
    captured: Option<serde_json::Value>,
    evidence: Option<Evidence>,
}

/// State that lives exactly as long as one run
#[derive(Debug, Default)]
struct RunContext {
    captures: HashMap<String, usize>,
    page_errors: Vec<String>,
}

/// Runs scenarios step by step against a browser adapter.
///
/// Steps execute strictly in order. The first failing blocking step halts the
/// run and every later step is recorded as skipped. Cancellation is observed
/// between steps only.
pub struct ScenarioExecutor {
    evidence_root: PathBuf,
    cancel: CancellationToken,
    checkpoint_screenshots: bool,
    state: ExecutorState,
}

impl ScenarioExecutor {
    pub fn new(evidence_root: impl Into<PathBuf>) -> Self {
        Self {
            evidence_root: evidence_root.into(),
            cancel: CancellationToken::new(),
            checkpoint_screenshots: false,
            state: ExecutorState::Idle,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Also capture a screenshot after each successful step
    pub fn with_checkpoint_screenshots(mut self, enabled: bool) -> Self {
        self.checkpoint_screenshots = enabled;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every step of `scenario`. Step failures end up in the report;
    /// they are never returned as errors.
    pub async fn run<A>(&mut self, scenario: &Scenario, adapter: &mut A) -> RunReport
    where
        A: BrowserAdapter + ?Sized,
    {
        let span = info_span!("scenario", name = %scenario.name());
        self.run_steps(scenario, adapter).instrument(span).await
    }

    async fn run_steps<A>(&mut self, scenario: &Scenario, adapter: &mut A) -> RunReport
    where
        A: BrowserAdapter + ?Sized,
    {
        self.state = ExecutorState::Running;
        debug!("Running {} step(s)", scenario.steps().len());

        let mut sink = EvidenceSink::new(&self.evidence_root, scenario.name());
        let mut ctx = RunContext::default();
        let mut halted = false;
        let mut cancelled = false;

        for (index, step) in scenario.steps().iter().enumerate() {
            if !halted && self.cancel.is_cancelled() {
                info!("Cancelled before step {}", index);
                cancelled = true;
                halted = true;
            }
            if halted {
                sink.record(ExecutionResult::skipped(index, step.describe(), step.blocking));
                continue;
            }

            let started = Instant::now();
            let outcome = self.execute_step(index, step, adapter, &sink, &mut ctx).await;

            let result = match outcome {
                Ok(mut done) => {
                    if done.evidence.is_none() && self.checkpoint_screenshots {
                        done.evidence = capture_evidence(adapter, &sink, index, "checkpoint").await;
                    }
                    ExecutionResult {
                        index,
                        step: step.describe(),
                        outcome: StepOutcome::Succeeded,
                        blocking: step.blocking,
                        duration_ms: started.elapsed().as_millis() as u64,
                        captured: done.captured,
                        evidence: done.evidence,
                        error: None,
                    }
                }
                Err(err) => {
                    if step.blocking {
                        error!("✗ step {} {} - {}", index, step.describe(), err);
                        halted = true;
                    } else {
                        warn!("step {} {} failed (non-blocking) - {}", index, step.describe(), err);
                    }
                    let evidence = capture_evidence(adapter, &sink, index, "failed").await;
                    ExecutionResult {
                        index,
                        step: step.describe(),
                        outcome: StepOutcome::Failed,
                        blocking: step.blocking,
                        duration_ms: started.elapsed().as_millis() as u64,
                        captured: None,
                        evidence,
                        error: Some(StepError::from(&err)),
                    }
                }
            };
            sink.record(result);
        }

        match adapter.take_page_errors().await {
            Ok(errors) => ctx.page_errors.extend(errors),
            Err(e) => warn!("Could not collect page errors: {}", e),
        }

        let report = sink.finalize(ctx.page_errors, cancelled);
        self.state = if report.passed {
            ExecutorState::Completed
        } else {
            ExecutorState::Failed
        };
        report
    }

    async fn execute_step<A>(
        &self,
        index: usize,
        step: &Step,
        adapter: &mut A,
        sink: &EvidenceSink,
        ctx: &mut RunContext,
    ) -> E2eResult<StepDone>
    where
        A: BrowserAdapter + ?Sized,
    {
        debug!("Executing step {}: {}", index, step.describe());

        if let (Some(spec), Some(target)) = (&step.wait, step.action.target()) {
            adapter.wait_for(target, spec).await?;
        }

        match &step.action {
            Action::Navigate { url } => {
                adapter.navigate(url).await?;
                Ok(StepDone::default())
            }
            Action::Fill { locator, text } => {
                adapter.fill(locator, text).await?;
                Ok(StepDone::default())
            }
            Action::Click { locator } => {
                adapter.click(locator).await?;
                Ok(StepDone::default())
            }
            Action::SelectOption { locator, option } => {
                adapter.select_option(locator, option).await?;
                Ok(StepDone::default())
            }
            Action::WaitForState { locator } => {
                if step.wait.is_none() {
                    adapter.wait_for(locator, &WaitSpec::default()).await?;
                }
                Ok(StepDone::default())
            }
            Action::AssertCount { capture_as, within, .. } => {
                let observed = assert_within(adapter, &step.action, within.as_ref(), ctx).await?;
                if let (Some(key), Some(count)) = (capture_as, observed.as_u64()) {
                    ctx.captures.insert(key.clone(), count as usize);
                }
                Ok(StepDone { captured: Some(observed), evidence: None })
            }
            Action::AssertText { within, .. } | Action::AssertAttribute { within, .. } => {
                let observed = assert_within(adapter, &step.action, within.as_ref(), ctx).await?;
                Ok(StepDone { captured: Some(observed), evidence: None })
            }
            Action::Download { trigger, expect_suffix, timeout_ms, save_as } => {
                let save_to = match save_as {
                    Some(name) => Some(sink.artifact_path(name)?),
                    None => None,
                };
                let download = adapter
                    .expect_download(trigger, *timeout_ms, save_to.as_deref())
                    .await?;
                if let Some(suffix) = expect_suffix {
                    if !download.suggested_filename.ends_with(suffix.as_str()) {
                        return Err(E2eError::AssertionFailed(format!(
                            "download '{}' does not end with '{}'",
                            download.suggested_filename, suffix
                        )));
                    }
                }
                let evidence = match &download.saved_to {
                    Some(path) => Some(Evidence::from_file(path)?),
                    None => None,
                };
                Ok(StepDone {
                    captured: Some(json!(download.suggested_filename)),
                    evidence,
                })
            }
            Action::Screenshot { name } => {
                let path = sink.evidence_path(index, name)?;
                adapter.screenshot(&path).await?;
                Ok(StepDone {
                    captured: None,
                    evidence: Some(Evidence::from_file(&path)?),
                })
            }
            Action::UploadFiles { locator, paths } => {
                adapter.set_input_files(locator, paths).await?;
                Ok(StepDone::default())
            }
            Action::AssertNoPageErrors => {
                ctx.page_errors.extend(adapter.take_page_errors().await?);
                if ctx.page_errors.is_empty() {
                    Ok(StepDone { captured: Some(json!(0)), evidence: None })
                } else {
                    Err(E2eError::AssertionFailed(format!(
                        "{} page error(s): {}",
                        ctx.page_errors.len(),
                        ctx.page_errors.join("; ")
                    )))
                }
            }
        }
    }
}

/// Evaluate an assertion step, re-evaluating under `within` until it holds.
///
/// Without `within` the assertion is checked exactly once. On deadline the
/// last observed mismatch is reported as `AssertionFailed`; so is a match
/// first seen by an observation that finished past the deadline.
async fn assert_within<A>(
    adapter: &mut A,
    action: &Action,
    within: Option<&PollPolicy>,
    ctx: &RunContext,
) -> E2eResult<serde_json::Value>
where
    A: BrowserAdapter + ?Sized,
{
    let Some(policy) = within else {
        let (observed, verdict) = observe(adapter, action, ctx).await?;
        return verdict.map(|()| observed).map_err(E2eError::AssertionFailed);
    };
    let mut poller = Poller::start(policy);

    loop {
        let failure = match observe(adapter, action, ctx).await {
            Ok((observed, Ok(()))) if !poller.expired() => return Ok(observed),
            Ok((_, Ok(()))) => E2eError::AssertionFailed(format!(
                "{} held only after {} ms, past its {} ms deadline",
                action.target().map(Locator::as_str).unwrap_or(action.kind()),
                poller.elapsed_ms(),
                policy.timeout_ms
            )),
            Ok((_, Err(mismatch))) => E2eError::AssertionFailed(mismatch),
            // The element may simply not be rendered yet
            Err(err @ E2eError::ElementNotFound(_)) => err,
            Err(err) => return Err(err),
        };
        if !poller.next_attempt().await {
            return Err(failure);
        }
    }
}

/// One observation of an assertion's subject and its verdict
async fn observe<A>(
    adapter: &mut A,
    action: &Action,
    ctx: &RunContext,
) -> E2eResult<(serde_json::Value, Result<(), String>)>
where
    A: BrowserAdapter + ?Sized,
{
    match action {
        Action::AssertCount { locator, expect, .. } => {
            let observed = adapter.count(locator).await?;
            let verdict = count_verdict(locator, expect, observed, &ctx.captures)?;
            Ok((json!(observed), verdict))
        }
        Action::AssertText { locator, expect, .. } => {
            let text = adapter.read_text(locator).await?;
            let verdict = match expect {
                TextExpectation::Equals(want) if text.trim() == want.trim() => Ok(()),
                TextExpectation::Contains(want) if text.contains(want.as_str()) => Ok(()),
                TextExpectation::Equals(want) => {
                    Err(format!("{locator}: expected text '{want}', observed '{text}'"))
                }
                TextExpectation::Contains(want) => {
                    Err(format!("{locator}: text '{text}' does not contain '{want}'"))
                }
            };
            Ok((json!(text), verdict))
        }
        Action::AssertAttribute { locator, name, expect, .. } => {
            let value = adapter.read_attribute(locator, name).await?;
            let verdict = match (expect, value.as_deref()) {
                (AttributeExpectation::Equals(want), Some(got)) if got == want => Ok(()),
                (AttributeExpectation::Contains(want), Some(got)) if got.contains(want.as_str()) => Ok(()),
                (AttributeExpectation::Present, Some(_)) => Ok(()),
                (AttributeExpectation::Absent, None) => Ok(()),
                (expect, got) => Err(format!(
                    "{locator}[{name}]: expected {expect:?}, observed {got:?}"
                )),
            };
            Ok((json!(value), verdict))
        }
        other => Err(E2eError::ScenarioParse(format!(
            "'{}' is not an assertion",
            other.kind()
        ))),
    }
}

/// Compare an observed count against its expectation
fn count_verdict(
    locator: &Locator,
    expect: &CountExpectation,
    observed: usize,
    captures: &HashMap<String, usize>,
) -> E2eResult<Result<(), String>> {
    let verdict = match expect {
        CountExpectation::Any => Ok(()),
        CountExpectation::Exactly(n) if observed == *n => Ok(()),
        CountExpectation::Exactly(n) => Err(format!("{locator}: expected {n}, observed {observed}")),
        CountExpectation::AtLeast(n) if observed >= *n => Ok(()),
        CountExpectation::AtLeast(n) => {
            Err(format!("{locator}: expected at least {n}, observed {observed}"))
        }
        CountExpectation::Delta { from, by } => {
            let base = *captures.get(from).ok_or_else(|| {
                E2eError::ScenarioParse(format!("no count captured as '{from}'"))
            })?;
            let want = base as i64 + by;
            if observed as i64 == want {
                Ok(())
            } else {
                Err(format!(
                    "{locator}: expected {want} ({from} {base} {by:+}), observed {observed}"
                ))
            }
        }
    };
    Ok(verdict)
}

/// Best-effort screenshot; failures only get logged
async fn capture_evidence<A>(
    adapter: &mut A,
    sink: &EvidenceSink,
    index: usize,
    label: &str,
) -> Option<Evidence>
where
    A: BrowserAdapter + ?Sized,
{
    let path = match sink.evidence_path(index, label) {
        Ok(path) => path,
        Err(e) => {
            warn!("No evidence directory: {}", e);
            return None;
        }
    };
    if let Err(e) = adapter.screenshot(&path).await {
        warn!("Screenshot for step {} failed: {}", index, e);
        return None;
    }
    Evidence::from_file(&path)
        .map_err(|e| warn!("Evidence at {} unreadable: {}", path.display(), e))
        .ok()
}

/// Loads scenarios and runs each on a fresh browser session
pub struct SuiteRunner<F: SessionFactory> {
    config: RunnerConfig,
    factory: F,
    cancel: CancellationToken,
}

impl<F: SessionFactory> SuiteRunner<F> {
    pub fn new(config: RunnerConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Cancelling stops every in-flight run before its next step
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the application under test, if configured
    pub async fn preflight(&self) -> E2eResult<()> {
        match &self.config.preflight {
            Some(policy) => wait_until_reachable(&self.config.playwright.base_url, policy).await,
            None => Ok(()),
        }
    }

    /// Run all scenarios in the scenarios directory
    pub async fn run_all(&self) -> E2eResult<SuiteReport> {
        let scenarios = Scenario::load_all(&self.config.scenarios_dir)?;
        self.run_scenarios(&scenarios).await
    }

    /// Run scenarios carrying a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<SuiteReport> {
        let scenarios: Vec<Scenario> = Scenario::load_all(&self.config.scenarios_dir)?
            .into_iter()
            .filter(|s| s.has_tag(tag))
            .collect();
        self.run_scenarios(&scenarios).await
    }

    /// Run one scenario by name
    pub async fn run_named(&self, name: &str) -> E2eResult<SuiteReport> {
        let scenario = Scenario::load_all(&self.config.scenarios_dir)?
            .into_iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| E2eError::ScenarioParse(format!("Scenario not found: {}", name)))?;
        self.run_scenarios(std::slice::from_ref(&scenario)).await
    }

    /// Run a list of scenarios, up to `parallelism` at a time. Reports keep
    /// the input order.
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> E2eResult<SuiteReport> {
        self.preflight().await?;

        let start = Instant::now();
        info!("Running {} scenario(s)...", scenarios.len());

        let runs: Vec<RunReport> = futures::stream::iter(scenarios)
            .map(|scenario| self.run_one(scenario))
            .buffered(self.config.parallelism.max(1))
            .collect()
            .await;

        let report = SuiteReport::from_runs(runs, start.elapsed().as_millis() as u64);
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            report.passed, report.failed, report.duration_ms
        );
        Ok(report)
    }

    async fn run_one(&self, scenario: &Scenario) -> RunReport {
        if self.cancel.is_cancelled() {
            return self.aborted(scenario, &E2eError::Cancelled);
        }
        let resolved = match scenario.resolve(&self.config.params) {
            Ok(resolved) => resolved,
            Err(e) => return self.aborted(scenario, &e),
        };

        let mut session = match self.factory.open().await {
            Ok(session) => session,
            Err(e) => return self.aborted(scenario, &e),
        };

        let mut executor = ScenarioExecutor::new(&self.config.evidence_dir)
            .with_cancellation(self.cancel.child_token())
            .with_checkpoint_screenshots(self.config.checkpoint_screenshots);
        let report = executor.run(&resolved, &mut session).await;

        if let Err(e) = self.factory.close(session).await {
            warn!("Closing session for '{}' failed: {}", scenario.name(), e);
        }

        if report.passed {
            info!("✓ {} ({} ms)", report.scenario, report.duration_ms);
        } else {
            let reason = report
                .first_failure()
                .and_then(|r| r.error.as_ref())
                .map(|e| e.message.as_str())
                .unwrap_or(if report.cancelled { "cancelled" } else { "unknown error" });
            error!("✗ {} - {}", report.scenario, reason);
        }
        report
    }

    fn aborted(&self, scenario: &Scenario, err: &E2eError) -> RunReport {
        error!("✗ {} - {}", scenario.name(), err);
        let mut sink = EvidenceSink::new(&self.config.evidence_dir, scenario.name());
        for (index, step) in scenario.steps().iter().enumerate() {
            sink.record(ExecutionResult::skipped(index, step.describe(), step.blocking));
        }
        sink.abort(err)
    }

    /// Write the suite report as JSON into the output directory
    pub fn write_report(&self, report: &SuiteReport) -> E2eResult<PathBuf> {
        report.write_json(&self.config.output_dir)
    }

    pub fn evidence_dir(&self) -> &Path {
        &self.config.evidence_dir
    }
}
