//! Identifier and policy types shared by every layer of the harness.
//!
//! These are thin newtypes over the integers that travel on the wire. None of
//! them carries meaning on the orchestrator side; they are addresses into the
//! executor's own tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Runtime load address of a module registered with the executor.
///
/// Always 64 bits wide so a 32-bit orchestrator can address a 64-bit
/// executor and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadAddress(pub u64);

impl fmt::Display for LoadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Executor-side key of a fixture within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixtureKey(pub u16);

/// Executor-side key of a routine within a fixture. Zero is a valid key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutineKey(pub u16);

/// Opaque value threaded through every call of one fixture run.
///
/// Only the executor interprets it. The orchestrator starts it at zero,
/// stores what each call hands back, and zeroes it at the points the fixture
/// state machine prescribes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(pub u64);

impl ContinuationToken {
    pub const ZERO: ContinuationToken = ContinuationToken(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// What the executor should do when a routine reports an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Disposition {
    /// Report the event and keep the run going.
    #[default]
    #[serde(rename = "continue")]
    Continue = 0,
    /// Break into an attached debugger, if any.
    #[serde(rename = "break", alias = "break-if-debugger")]
    BreakIfDebugger = 1,
    /// Always break, even without a debugger attached.
    #[serde(rename = "break-always", alias = "always-break")]
    AlwaysBreak = 2,
    /// Abort the whole test run.
    #[serde(rename = "abort", alias = "abort-run")]
    AbortRun = 3,
}

impl Disposition {
    /// Decode a wire value; anything past `AbortRun` is out of domain.
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Continue),
            1 => Some(Self::BreakIfDebugger),
            2 => Some(Self::AlwaysBreak),
            3 => Some(Self::AbortRun),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::BreakIfDebugger => "break",
            Self::AlwaysBreak => "break-always",
            Self::AbortRun => "abort",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "break" | "break-if-debugger" => Ok(Self::BreakIfDebugger),
            "break-always" | "always-break" => Ok(Self::AlwaysBreak),
            "abort" | "abort-run" => Ok(Self::AbortRun),
            other => Err(format!("unknown disposition: {other}")),
        }
    }
}

/// Per-event-kind policy, restated on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispositions {
    pub failed_assertion: Disposition,
    pub uncaught_exception: Disposition,
}

impl Dispositions {
    pub fn new(failed_assertion: Disposition, uncaught_exception: Disposition) -> Self {
        Self { failed_assertion, uncaught_exception }
    }
}
