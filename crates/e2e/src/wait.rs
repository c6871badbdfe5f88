//! Wait/retry policy: timeout-and-poll semantics for UI that settles asynchronously

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::E2eError;

/// Default interval between two observations
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Modals opening, tabs switching, rows appearing
pub const STATE_CHANGE_TIMEOUT_MS: u64 = 5_000;

/// App container becoming ready after login
pub const RENDER_TIMEOUT_MS: u64 = 10_000;

/// Chart draws and other heavy renders
pub const HEAVY_RENDER_TIMEOUT_MS: u64 = 15_000;

/// Element state a wait is looking for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long to keep polling and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    STATE_CHANGE_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::state_change()
    }
}

impl PollPolicy {
    pub const fn new(timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self { timeout_ms, poll_interval_ms }
    }

    pub const fn state_change() -> Self {
        Self::new(STATE_CHANGE_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS)
    }

    pub const fn render() -> Self {
        Self::new(RENDER_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS)
    }

    pub const fn heavy_render() -> Self {
        Self::new(HEAVY_RENDER_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval, never zero so a tight loop cannot starve the runtime
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A state precondition on a step's target element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSpec {
    #[serde(default)]
    pub state: WaitState,
    #[serde(flatten)]
    pub policy: PollPolicy,
}

impl WaitSpec {
    pub const fn new(state: WaitState, policy: PollPolicy) -> Self {
        Self { state, policy }
    }

    pub const fn visible() -> Self {
        Self::new(WaitState::Visible, PollPolicy::state_change())
    }

    pub const fn attached() -> Self {
        Self::new(WaitState::Attached, PollPolicy::state_change())
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.policy.timeout_ms = timeout_ms;
        self
    }
}

/// One fresh observation of a locator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProbe {
    /// Number of matching elements
    pub count: usize,
    /// Whether the first match is rendered visibly
    pub visible: bool,
}

impl ElementProbe {
    pub const fn absent() -> Self {
        Self { count: 0, visible: false }
    }

    pub fn satisfies(&self, state: WaitState) -> bool {
        match state {
            WaitState::Visible => self.count > 0 && self.visible,
            WaitState::Hidden => self.count == 0 || !self.visible,
            WaitState::Attached => self.count > 0,
            WaitState::Detached => self.count == 0,
        }
    }
}

/// Paces the attempts of one polled condition against its deadline.
///
/// The caller owns the loop so the condition may borrow the adapter
/// mutably between attempts:
///
/// ```ignore
/// let mut poller = Poller::start(&policy);
/// loop {
///     if condition(adapter).await? && !poller.expired() { break; }
///     if !poller.next_attempt().await {
///         return Err(poller.timed_out("condition"));
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    started: Instant,
    attempts: u32,
}

impl Poller {
    pub fn start(policy: &PollPolicy) -> Self {
        Self {
            policy: *policy,
            started: Instant::now(),
            attempts: 1,
        }
    }

    /// Sleep until the next attempt is due. Returns `false` once the
    /// deadline has passed; the last attempt lands on the deadline itself.
    pub async fn next_attempt(&mut self) -> bool {
        let timeout = self.policy.timeout();
        let elapsed = self.started.elapsed();
        if elapsed >= timeout {
            return false;
        }
        let remaining = timeout - elapsed;
        sleep(self.policy.poll_interval().min(remaining)).await;
        self.attempts += 1;
        true
    }

    /// Whether the deadline has passed. An attempt that finishes after it
    /// cannot count as success, however it turned out.
    pub fn expired(&self) -> bool {
        self.elapsed_ms() > self.policy.timeout_ms
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn timed_out(&self, what: impl Into<String>) -> E2eError {
        E2eError::Timeout {
            what: what.into(),
            waited_ms: self.elapsed_ms(),
        }
    }
}
