//! kfix: orchestration of unit tests that run inside a privileged executor.
//!
//! Test code lives in modules loaded into a kernel-mode executor. This crate
//! is the unprivileged side: it installs and starts modules as services,
//! finds them in the executor, reads their fixture descriptors and drives
//! each fixture routine by routine, translating the events that come back.
//!
//! # Layers
//!
//! - [`wire`]: byte layout of the three control codes
//! - [`executor`]: transport to the executor (device on Windows, loopback)
//! - [`service`]: install/start/stop/delete of module services
//! - [`discovery`], [`descriptor`]: locating a module and reading its fixtures
//! - [`channel`], [`events`]: invoking one routine and decoding its events
//! - [`orchestrator`]: Setup/Before/TestCase/After/Teardown sequencing
//!
//! The executor holds no per-fixture state. The only context carried from
//! one routine call to the next is the continuation token, and the token
//! is owned by the calling thread's [`orchestrator::FixtureRun`].

pub mod channel;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod events;
pub mod executor;
pub mod harness;
pub mod module;
pub mod orchestrator;
pub mod report;
pub mod service;
pub mod telemetry;
pub mod types;
pub mod wire;

pub use channel::{ChannelError, RoutineCall, RoutineChannel};
pub use descriptor::{Fixture, TestCase};
pub use error::ErrorCategory;
pub use events::{EventKind, ExceptionRecord, ExecutionEvent};
pub use harness::{Harness, HarnessSettings};
pub use module::{ModuleError, TestModule};
pub use orchestrator::{ExecutionOptions, FixtureReport, FixtureRun, Orchestrator, StepStatus};
pub use report::{EventSink, RunSummary, SummaryCollector};
pub use types::{ContinuationToken, Disposition, Dispositions, FixtureKey, LoadAddress, RoutineKey};
