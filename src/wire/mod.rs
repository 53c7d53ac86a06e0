//! Wire format shared with the executor.
//!
//! Every structure the executor returns is self-relative: strings and
//! sub-records are addressed by byte offsets into the same buffer. Reads go
//! through [`WireView`], which checks bounds before every access.

pub mod layout;
mod view;
mod writer;

pub use layout::{
    CallRequest, CallResponseHeader, ControlCode, EntryType, EventType, CALL_REQUEST_SIZE,
    CALL_RESPONSE_HEADER_SIZE,
};
pub use view::{WireCursor, WireView};
pub use writer::WireWriter;

use thiserror::Error;

/// Malformed data received from (or destined for) the executor.
///
/// A protocol error is always fatal to the call that produced it; nothing
/// in the harness attempts to repair a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("response too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("field at offset {offset} with length {length} exceeds bound {bound}")]
    OutOfBounds { offset: usize, length: usize, bound: usize },

    #[error("string length {0} is not a whole number of UTF-16 units")]
    OddStringLength(usize),

    #[error("name of {units} UTF-16 units exceeds maximum of {max}")]
    NameTooLong { units: usize, max: usize },

    #[error("unknown descriptor entry type {0}")]
    UnknownEntryType(u16),

    #[error("unknown event type {0}")]
    UnknownEventType(u16),

    #[error("unknown exception record kind {0}")]
    UnknownExceptionKind(u32),

    #[error("disposition {0} is out of range")]
    InvalidDisposition(u32),

    #[error("malformed message: {0}")]
    Malformed(String),
}
