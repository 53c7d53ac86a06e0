//! Execution events reported by routines running inside the executor.
//!
//! The executor packs events into the CallRoutine response; [`translate`]
//! turns them into owned [`ExecutionEvent`] values and [`encode`] produces
//! the wire form (used by the loopback executor).

pub mod encode;
pub mod translate;

pub use encode::{encode_event, MAX_EVENT_STRING_UNITS, MAX_STACK_FRAMES};
pub use translate::{decode_event, decode_events};

use serde::Serialize;
use std::fmt;

/// Exception record as captured by the executor.
///
/// The width is whatever the wire declares, independent of the width of the
/// orchestrator consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "width", rename_all = "snake_case")]
pub enum ExceptionRecord {
    Narrow {
        code: u32,
        flags: u32,
        record: u32,
        address: u32,
        parameter_count: u32,
    },
    Wide {
        code: u32,
        flags: u32,
        record: u64,
        address: u64,
        parameter_count: u32,
    },
}

impl ExceptionRecord {
    pub fn code(&self) -> u32 {
        match self {
            Self::Narrow { code, .. } | Self::Wide { code, .. } => *code,
        }
    }

    pub fn flags(&self) -> u32 {
        match self {
            Self::Narrow { flags, .. } | Self::Wide { flags, .. } => *flags,
        }
    }

    pub fn address(&self) -> u64 {
        match self {
            Self::Narrow { address, .. } => u64::from(*address),
            Self::Wide { address, .. } => *address,
        }
    }

    /// Address as seen by a 32-bit consumer. Wide addresses that do not fit
    /// collapse to `u32::MAX`.
    pub fn address_for_narrow(&self) -> u32 {
        match self {
            Self::Narrow { address, .. } => *address,
            Self::Wide { address, .. } => u32::try_from(*address).unwrap_or(u32::MAX),
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Wide { .. })
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    FailedAssertion {
        file: String,
        routine: String,
        line: u32,
        expression: String,
        last_error: Option<u32>,
    },
    UncaughtException {
        record: ExceptionRecord,
    },
    Inconclusiveness {
        message: String,
    },
    Log {
        message: String,
    },
}

/// One translated event plus the stack captured when it was reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub stack_trace: Vec<u64>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, stack_trace: Vec::new() }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::new(EventKind::Log { message: message.into() })
    }

    pub fn inconclusive(message: impl Into<String>) -> Self {
        Self::new(EventKind::Inconclusiveness { message: message.into() })
    }

    pub fn with_stack_trace(mut self, frames: Vec<u64>) -> Self {
        self.stack_trace = frames;
        self
    }

    /// Events that count against the test case.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            EventKind::FailedAssertion { .. } | EventKind::UncaughtException { .. }
        )
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::FailedAssertion { file, routine, line, expression, last_error } => {
                write!(f, "{file}({line}): {routine}: assertion failed: {expression}")?;
                if let Some(code) = last_error {
                    write!(f, " (last error {code})")?;
                }
                Ok(())
            }
            EventKind::UncaughtException { record } => write!(
                f,
                "uncaught exception {:#010x} at {:#x}",
                record.code(),
                record.address()
            ),
            EventKind::Inconclusiveness { message } => write!(f, "inconclusive: {message}"),
            EventKind::Log { message } => write!(f, "log: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_record_seen_by_narrow_consumer() {
        let wide = ExceptionRecord::Wide {
            code: 0xC000_0005,
            flags: 0,
            record: 0,
            address: 0xFFFF_F800_0000_1000,
            parameter_count: 2,
        };
        assert_eq!(wide.code(), 0xC000_0005);
        assert_eq!(wide.address_for_narrow(), u32::MAX);

        let low = ExceptionRecord::Wide {
            code: 1,
            flags: 0,
            record: 0,
            address: 0x1000,
            parameter_count: 0,
        };
        assert_eq!(low.address_for_narrow(), 0x1000);
    }

    #[test]
    fn test_narrow_record_widens() {
        let narrow = ExceptionRecord::Narrow {
            code: 0x8000_0003,
            flags: 1,
            record: 0,
            address: 0x8040_0000,
            parameter_count: 0,
        };
        assert_eq!(narrow.address(), 0x8040_0000);
        assert!(!narrow.is_wide());
    }

    #[test]
    fn test_display_failed_assertion() {
        let event = ExecutionEvent::new(EventKind::FailedAssertion {
            file: "sample.c".into(),
            routine: "Test01".into(),
            line: 42,
            expression: "x == 1".into(),
            last_error: Some(5),
        });
        assert_eq!(
            event.to_string(),
            "sample.c(42): Test01: assertion failed: x == 1 (last error 5)"
        );
        assert!(event.is_failure());
        assert!(!ExecutionEvent::log("hi").is_failure());
    }

    #[test]
    fn test_serialize_tags_kind() {
        let json = serde_json::to_value(ExecutionEvent::log("hello")).unwrap();
        assert_eq!(json["kind"], "log");
        assert_eq!(json["message"], "hello");
    }
}
