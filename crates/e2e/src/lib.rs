//! uiflow scenario executor
//!
//! This crate verifies business workflows of a browser-rendered application
//! by driving it through declarative scenarios:
//! - Parses YAML scenarios into ordered, immutable step lists
//! - Drives a real browser through Playwright behind a narrow adapter trait
//! - Waits on element states with bounded polling instead of fixed sleeps
//! - Records per-step outcomes and screenshot/download evidence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SuiteRunner<F: SessionFactory>              │
//! │    ├── preflight() -> base URL reachable                    │
//! │    ├── run_all() / run_tagged() / run_named()               │
//! │    └── one fresh session per scenario, `parallelism` wide   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioExecutor                                           │
//! │    ├── run(scenario, adapter) -> RunReport                  │
//! │    ├── wait -> action -> assert (with optional `within`)    │
//! │    └── first blocking failure halts, rest are skipped       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, description, tags, params                      │
//! │    └── steps: [Step]                                        │
//! │          ├── navigate / fill / click / select_option        │
//! │          ├── wait_for_state { locator, wait }               │
//! │          ├── assert_count { capture_as?, expect: delta }    │
//! │          ├── assert_text / assert_attribute                 │
//! │          ├── download / upload_files / screenshot           │
//! │          └── assert_no_page_errors                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserAdapter (trait)                                     │
//! │    └── PlaywrightSession: Node bridge over JSON lines       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod playwright;
pub mod preflight;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod wait;

pub use adapter::{BrowserAdapter, DownloadInfo, Locator, OptionRef, SessionFactory};
pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult, ErrorKind};
pub use report::{ExecutionResult, RunReport, StepOutcome, SuiteReport};
pub use runner::{ExecutorState, ScenarioExecutor, SuiteRunner};
pub use scenario::{Action, CountExpectation, Scenario, ScenarioBuilder, Step};
pub use wait::{ElementProbe, PollPolicy, WaitSpec, WaitState};
