//! Reporting hooks and the run summary.
//!
//! The orchestrator pushes translated events and per-test outcomes into an
//! [`EventSink`]. [`SummaryCollector`] is the sink the CLI uses; it builds a
//! serializable [`RunSummary`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::descriptor::{Fixture, TestCase};
use crate::events::ExecutionEvent;
use crate::orchestrator::Step;

/// Receives everything a fixture run produces.
pub trait EventSink {
    fn before_fixture(&mut self, _fixture: &Fixture) {}

    fn before_test_case(&mut self, _fixture: &Fixture, _test_case: &TestCase) {}

    /// `test_case` is `None` for Setup and Teardown.
    fn on_event(
        &mut self,
        fixture: &Fixture,
        test_case: Option<&TestCase>,
        step: Step,
        event: &ExecutionEvent,
    );

    fn after_test_case(&mut self, _fixture: &Fixture, _test_case: &TestCase, _ran_to_completion: bool) {}

    fn after_fixture(&mut self, _fixture: &Fixture, _ran_to_completion: bool) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&mut self, _: &Fixture, _: Option<&TestCase>, _: Step, _: &ExecutionEvent) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct StepEvent {
    pub step: Step,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseSummary {
    pub name: String,
    pub passed: bool,
    pub events: Vec<StepEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixtureSummary {
    pub name: String,
    pub ran_to_completion: bool,
    /// Events from Setup and Teardown.
    pub events: Vec<StepEvent>,
    pub test_cases: Vec<TestCaseSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub module: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub aborted: bool,
    pub fixtures: Vec<FixtureSummary>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.test_cases().filter(|t| t.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.test_cases().filter(|t| !t.passed).count()
    }

    pub fn incomplete_fixtures(&self) -> usize {
        self.fixtures.iter().filter(|f| !f.ran_to_completion).count()
    }

    /// No failed test case, no incomplete fixture, no abort.
    pub fn succeeded(&self) -> bool {
        !self.aborted && self.failed() == 0 && self.incomplete_fixtures() == 0
    }

    fn test_cases(&self) -> impl Iterator<Item = &TestCaseSummary> {
        self.fixtures.iter().flat_map(|f| f.test_cases.iter())
    }
}

/// Sink that accumulates a [`RunSummary`].
#[derive(Debug)]
pub struct SummaryCollector {
    summary: RunSummary,
}

impl SummaryCollector {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            summary: RunSummary {
                run_id: Uuid::new_v4(),
                module: module.into(),
                started_at: Utc::now(),
                finished_at: None,
                aborted: false,
                fixtures: Vec::new(),
            },
        }
    }

    pub fn mark_aborted(&mut self) {
        self.summary.aborted = true;
    }

    pub fn finish(mut self) -> RunSummary {
        self.summary.finished_at = Some(Utc::now());
        self.summary
    }
}

impl EventSink for SummaryCollector {
    fn before_fixture(&mut self, fixture: &Fixture) {
        self.summary.fixtures.push(FixtureSummary {
            name: fixture.name.clone(),
            ran_to_completion: false,
            events: Vec::new(),
            test_cases: Vec::new(),
        });
    }

    fn before_test_case(&mut self, _fixture: &Fixture, test_case: &TestCase) {
        if let Some(current) = self.summary.fixtures.last_mut() {
            current.test_cases.push(TestCaseSummary {
                name: test_case.name.clone(),
                passed: false,
                events: Vec::new(),
            });
        }
    }

    fn on_event(
        &mut self,
        _fixture: &Fixture,
        test_case: Option<&TestCase>,
        step: Step,
        event: &ExecutionEvent,
    ) {
        let Some(current) = self.summary.fixtures.last_mut() else {
            return;
        };
        let record = StepEvent { step, event: event.clone() };
        match (test_case, current.test_cases.last_mut()) {
            (Some(_), Some(tc)) => tc.events.push(record),
            _ => current.events.push(record),
        }
    }

    fn after_test_case(&mut self, _fixture: &Fixture, _test_case: &TestCase, ran_to_completion: bool) {
        if let Some(tc) = self.summary.fixtures.last_mut().and_then(|f| f.test_cases.last_mut()) {
            tc.passed = ran_to_completion;
        }
    }

    fn after_fixture(&mut self, _fixture: &Fixture, ran_to_completion: bool) {
        if let Some(current) = self.summary.fixtures.last_mut() {
            current.ran_to_completion = ran_to_completion;
        }
    }
}
