//! Span factories and result recording.

use tracing::{info_span, Span};

pub trait SpanExt {
    /// Fill `status` and, on error, `error.message`.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Span covering one fixture run.
pub struct FixtureSpan;

impl FixtureSpan {
    /// `status`, `error.message`, `test_cases` and `elapsed_ms` are left
    /// empty for the caller to record.
    pub fn new(module: &str, fixture: &str) -> Span {
        info_span!(
            "fixture_run",
            module = %module,
            fixture = %fixture,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            test_cases = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        )
    }
}
