//! Fixture execution.
//!
//! A fixture run is `Setup? -> (Before? -> TestCase -> After?)* -> Teardown?`,
//! stitched together from independent routine calls. The only state carried
//! between calls is the continuation token, owned by the [`FixtureRun`] of
//! the calling thread:
//!
//! - zero before Setup, and zero again once Setup returns;
//! - Before and TestCase store the token they get back, so a TestCase sees
//!   exactly what its Before left;
//! - After is called with the current token and the slot is zeroed afterwards;
//! - Teardown is called with a copy after the slot has been zeroed.
//!
//! An abort flag from any call ends the run at once.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::channel::{ChannelError, RoutineCall};
use crate::descriptor::{Fixture, TestCase};
use crate::events::ExecutionEvent;
use crate::module::TestModule;
use crate::report::EventSink;
use crate::telemetry::{FixtureSpan, SpanExt};
use crate::types::{ContinuationToken, Dispositions, RoutineKey};

/// Log line forwarded after the events of a truncated response.
pub const TRUNCATION_NOTE: &str = "Note: At least one event has been dropped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Setup,
    Before,
    TestCase,
    After,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SetupFailed,
    BeforeRoutineFailed,
    TestRoutineFailed,
    AfterRoutineFailed,
    TeardownFailed,
}

/// Outcome of one step, or of one Before/TestCase/After sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed(FailureKind),
    Aborted,
}

impl StepStatus {
    pub fn is_success(self) -> bool {
        self == StepStatus::Succeeded
    }

    fn from_call(call: &RoutineCall, failure: FailureKind) -> Self {
        if call.abort_requested {
            StepStatus::Aborted
        } else if call.ran_to_completion {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed(failure)
        }
    }
}

/// How failures propagate beyond a single test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Skip the remaining test cases of a fixture after the first failure.
    pub shortcut_fixture_on_failure: bool,
    /// Abort the whole run when a Setup fails.
    pub shortcut_run_on_setup_failure: bool,
    /// Abort the run when a fixture is shortcut or its Teardown fails.
    pub escalate_fixture_failures: bool,
}

/// State of one fixture run on one thread.
pub struct FixtureRun<'a> {
    module: &'a TestModule,
    fixture: &'a Fixture,
    dispositions: Dispositions,
    token: ContinuationToken,
    current: Option<&'a TestCase>,
}

impl<'a> FixtureRun<'a> {
    /// Allocate the run's token at zero.
    pub fn new(module: &'a TestModule, fixture: &'a Fixture, dispositions: Dispositions) -> Self {
        Self { module, fixture, dispositions, token: ContinuationToken::ZERO, current: None }
    }

    pub fn token(&self) -> ContinuationToken {
        self.token
    }

    /// A missing Setup counts as success.
    pub fn run_setup(&mut self, sink: &mut dyn EventSink) -> Result<StepStatus, ChannelError> {
        let Some(routine) = self.fixture.setup else {
            return Ok(StepStatus::Succeeded);
        };
        let call = self.invoke(Step::Setup, routine, self.token, sink)?;
        self.token = ContinuationToken::ZERO;
        Ok(StepStatus::from_call(&call, FailureKind::SetupFailed))
    }

    pub fn run_before(&mut self, sink: &mut dyn EventSink) -> Result<StepStatus, ChannelError> {
        let Some(routine) = self.fixture.before else {
            return Ok(StepStatus::Succeeded);
        };
        let call = self.invoke(Step::Before, routine, self.token, sink)?;
        self.token = call.token;
        Ok(StepStatus::from_call(&call, FailureKind::BeforeRoutineFailed))
    }

    pub fn run_test_case(
        &mut self,
        test_case: &'a TestCase,
        sink: &mut dyn EventSink,
    ) -> Result<StepStatus, ChannelError> {
        self.current = Some(test_case);
        let call = self.invoke(Step::TestCase, test_case.routine, self.token, sink)?;
        self.token = call.token;
        Ok(StepStatus::from_call(&call, FailureKind::TestRoutineFailed))
    }

    pub fn run_after(&mut self, sink: &mut dyn EventSink) -> Result<StepStatus, ChannelError> {
        let Some(routine) = self.fixture.after else {
            return Ok(StepStatus::Succeeded);
        };
        let call = self.invoke(Step::After, routine, self.token, sink)?;
        self.token = ContinuationToken::ZERO;
        Ok(StepStatus::from_call(&call, FailureKind::AfterRoutineFailed))
    }

    /// Releases the token slot before the call; the token is zero afterwards
    /// whatever Teardown returns.
    pub fn run_teardown(&mut self, sink: &mut dyn EventSink) -> Result<StepStatus, ChannelError> {
        self.current = None;
        let token = std::mem::take(&mut self.token);
        let Some(routine) = self.fixture.teardown else {
            return Ok(StepStatus::Succeeded);
        };
        let call = self.invoke(Step::Teardown, routine, token, sink)?;
        Ok(StepStatus::from_call(&call, FailureKind::TeardownFailed))
    }

    /// Before, TestCase and After for one test case.
    ///
    /// A failed Before skips the test case and After. After runs whenever
    /// the test case ran without aborting; a test case failure outranks an
    /// After failure.
    pub fn run_test_sequence(
        &mut self,
        test_case: &'a TestCase,
        sink: &mut dyn EventSink,
    ) -> Result<StepStatus, ChannelError> {
        self.current = Some(test_case);
        let status = match self.run_before(sink)? {
            StepStatus::Succeeded => match self.run_test_case(test_case, sink)? {
                StepStatus::Aborted => StepStatus::Aborted,
                test => match self.run_after(sink)? {
                    StepStatus::Aborted => StepStatus::Aborted,
                    after if test.is_success() => after,
                    _ => test,
                },
            },
            other => other,
        };
        self.current = None;
        Ok(status)
    }

    fn invoke(
        &mut self,
        step: Step,
        routine: RoutineKey,
        token: ContinuationToken,
        sink: &mut dyn EventSink,
    ) -> Result<RoutineCall, ChannelError> {
        let call = self.module.channel().call_routine(
            self.module.address(),
            self.fixture.key,
            routine,
            self.dispositions,
            token,
        )?;

        let test_case = match step {
            Step::Setup | Step::Teardown => None,
            _ => self.current,
        };
        for event in &call.events {
            sink.on_event(self.fixture, test_case, step, event);
        }
        if call.truncated {
            sink.on_event(self.fixture, test_case, step, &ExecutionEvent::log(TRUNCATION_NOTE));
        }

        tracing::debug!(
            fixture = %self.fixture.name,
            ?step,
            routine = routine.0,
            ran_to_completion = call.ran_to_completion,
            abort = call.abort_requested,
            events = call.events.len(),
            "routine returned"
        );
        Ok(call)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseReport {
    pub name: String,
    pub status: StepStatus,
}

/// What happened to one fixture.
#[derive(Debug, Clone, Serialize)]
pub struct FixtureReport {
    pub fixture: String,
    pub setup: StepStatus,
    pub test_cases: Vec<TestCaseReport>,
    /// `None` when Teardown was never reached.
    pub teardown: Option<StepStatus>,
    pub ran_to_completion: bool,
    /// The rest of the run must not execute.
    pub abort_run: bool,
}

impl FixtureReport {
    pub fn setup_failed(&self) -> bool {
        matches!(self.setup, StepStatus::Failed(FailureKind::SetupFailed))
    }

    pub fn aborted(&self) -> bool {
        self.setup == StepStatus::Aborted
            || self.teardown == Some(StepStatus::Aborted)
            || self.test_cases.iter().any(|t| t.status == StepStatus::Aborted)
    }
}

/// Runs fixtures with a fixed policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Orchestrator {
    dispositions: Dispositions,
    options: ExecutionOptions,
}

impl Orchestrator {
    pub fn new(dispositions: Dispositions, options: ExecutionOptions) -> Self {
        Self { dispositions, options }
    }

    pub fn run_fixture(
        &self,
        module: &TestModule,
        fixture: &Fixture,
        sink: &mut dyn EventSink,
    ) -> Result<FixtureReport, ChannelError> {
        let span = FixtureSpan::new(module.name(), &fixture.name);
        let _enter = span.enter();
        let started = Instant::now();

        let result = self.drive(module, fixture, sink);

        span.record_result(&result);
        span.record("elapsed_ms", started.elapsed().as_millis() as u64);
        if let Ok(report) = &result {
            span.record("test_cases", report.test_cases.len() as u64);
        }
        result
    }

    /// Run every fixture of `module` in order, stopping at the first one
    /// that aborts the run.
    pub fn run_module(
        &self,
        module: &TestModule,
        sink: &mut dyn EventSink,
    ) -> Result<Vec<FixtureReport>, ChannelError> {
        let mut reports = Vec::with_capacity(module.fixtures().len());
        for fixture in module.fixtures() {
            let report = self.run_fixture(module, fixture, sink)?;
            let abort = report.abort_run;
            reports.push(report);
            if abort {
                tracing::warn!(module = %module.name(), fixture = %fixture.name, "run aborted");
                break;
            }
        }
        Ok(reports)
    }

    fn drive(
        &self,
        module: &TestModule,
        fixture: &Fixture,
        sink: &mut dyn EventSink,
    ) -> Result<FixtureReport, ChannelError> {
        sink.before_fixture(fixture);
        let mut run = FixtureRun::new(module, fixture, self.dispositions);
        let mut report = FixtureReport {
            fixture: fixture.name.clone(),
            setup: StepStatus::Succeeded,
            test_cases: Vec::new(),
            teardown: None,
            ran_to_completion: false,
            abort_run: false,
        };

        report.setup = run.run_setup(sink)?;
        match report.setup {
            StepStatus::Aborted => {
                report.abort_run = true;
                sink.after_fixture(fixture, false);
                return Ok(report);
            }
            StepStatus::Failed(_) => {
                report.abort_run = self.options.shortcut_run_on_setup_failure;
                sink.after_fixture(fixture, false);
                return Ok(report);
            }
            StepStatus::Succeeded => {}
        }

        let mut shortcut = false;
        for test_case in &fixture.test_cases {
            sink.before_test_case(fixture, test_case);
            let status = run.run_test_sequence(test_case, sink)?;
            sink.after_test_case(fixture, test_case, status.is_success());
            report.test_cases.push(TestCaseReport { name: test_case.name.clone(), status });

            match status {
                StepStatus::Aborted => {
                    report.abort_run = true;
                    sink.after_fixture(fixture, false);
                    return Ok(report);
                }
                StepStatus::Failed(_) if self.options.shortcut_fixture_on_failure => {
                    shortcut = true;
                    report.abort_run = self.options.escalate_fixture_failures;
                    break;
                }
                _ => {}
            }
        }

        let teardown = run.run_teardown(sink)?;
        report.teardown = Some(teardown);
        report.ran_to_completion = !shortcut && teardown.is_success();
        match teardown {
            StepStatus::Aborted => report.abort_run = true,
            StepStatus::Failed(_) if self.options.escalate_fixture_failures => report.abort_run = true,
            _ => {}
        }

        sink.after_fixture(fixture, report.ran_to_completion);
        Ok(report)
    }
}
