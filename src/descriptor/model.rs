//! In-memory fixture graph of a module.

use serde::Serialize;
use std::fmt;

use crate::types::{FixtureKey, LoadAddress, RoutineKey};

/// Special routines a fixture may have at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineRole {
    Setup,
    Teardown,
    Before,
    After,
}

impl fmt::Display for RoutineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
            Self::Before => "before",
            Self::After => "after",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    pub name: String,
    pub routine: RoutineKey,
    /// Owning fixture.
    pub fixture: FixtureKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fixture {
    pub name: String,
    pub key: FixtureKey,
    /// Load address of the owning module.
    pub module: LoadAddress,
    pub setup: Option<RoutineKey>,
    pub teardown: Option<RoutineKey>,
    pub before: Option<RoutineKey>,
    pub after: Option<RoutineKey>,
    pub test_cases: Vec<TestCase>,
}

impl Fixture {
    pub fn new(name: impl Into<String>, key: FixtureKey, module: LoadAddress) -> Self {
        Self {
            name: name.into(),
            key,
            module,
            setup: None,
            teardown: None,
            before: None,
            after: None,
            test_cases: Vec::new(),
        }
    }

    pub fn routine(&self, role: RoutineRole) -> Option<RoutineKey> {
        match role {
            RoutineRole::Setup => self.setup,
            RoutineRole::Teardown => self.teardown,
            RoutineRole::Before => self.before,
            RoutineRole::After => self.after,
        }
    }

    pub(crate) fn slot_mut(&mut self, role: RoutineRole) -> &mut Option<RoutineKey> {
        match role {
            RoutineRole::Setup => &mut self.setup,
            RoutineRole::Teardown => &mut self.teardown,
            RoutineRole::Before => &mut self.before,
            RoutineRole::After => &mut self.after,
        }
    }

    pub fn test_case(&self, name: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|t| t.name == name)
    }
}
