//! Structured logging and tracing spans.
//!
//! Log lines go to stderr or a file so the run summary on stdout stays
//! machine-readable.

mod logging;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use spans::{FixtureSpan, SpanExt};
