//! Byte layouts of the three executor control messages.
//!
//! All integers are little-endian. Strings are UTF-16LE, measured in bytes
//! and never terminated.
//!
//! ```text
//! ListModules            out: count:u32 reserved:u32 address:u64[capacity]
//! QueryModuleDescriptor  in:  address:u64
//!                        out: fixture_count:u32 fixture_offset:u32[n] blocks... strings...
//!                             (on "more data": size_required:u32)
//! CallRoutine            in:  address:u64 fixture:u16 routine:u16 assert_disp:u32
//!                             exception_disp:u32 reserved:u32 token:u64
//!                        out: header (24 bytes) then events, each 8-aligned
//! ```

use super::{ProtocolError, WireView, WireWriter};
use crate::types::{ContinuationToken, Disposition, Dispositions, FixtureKey, LoadAddress, RoutineKey};

/// Size of the ListModules header preceding the address array.
pub const LIST_MODULES_HEADER_SIZE: usize = 8;
/// Smallest ListModules output buffer: header plus one address.
pub const LIST_MODULES_MIN_OUTPUT: usize = LIST_MODULES_HEADER_SIZE + 8;

/// QueryModuleDescriptor input size.
pub const QUERY_DESCRIPTOR_REQUEST_SIZE: usize = 8;
/// Smallest descriptor output: a zero-fixture descriptor, or the size hint.
pub const DESCRIPTOR_MIN_OUTPUT: usize = 4;
/// Fixed part of a fixture block.
pub const FIXTURE_BLOCK_HEADER_SIZE: usize = 16;
/// One entry inside a fixture block.
pub const FIXTURE_ENTRY_SIZE: usize = 12;

pub const CALL_REQUEST_SIZE: usize = 32;
pub const CALL_RESPONSE_HEADER_SIZE: usize = 24;

/// Event header: type, size, frame count, reserved.
pub const EVENT_HEADER_SIZE: usize = 8;
/// Fixed per-type info block that follows the event header.
pub const EVENT_INFO_SIZE: usize = 48;
pub const EVENT_FIXED_SIZE: usize = EVENT_HEADER_SIZE + EVENT_INFO_SIZE;
pub const EVENT_ALIGNMENT: usize = 8;

/// Response flag: at least one event did not fit and was dropped.
pub const RESPONSE_FLAG_TRUNCATED: u32 = 0x1;

/// Control codes understood by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlCode {
    ListModules = 1,
    QueryModuleDescriptor = 2,
    CallRoutine = 3,
}

impl ControlCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListModules => "list_modules",
            Self::QueryModuleDescriptor => "query_module_descriptor",
            Self::CallRoutine => "call_routine",
        }
    }
}

/// Tag of one entry in a fixture block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EntryType {
    Setup = 1,
    Teardown = 2,
    TestCase = 3,
    Before = 4,
    After = 5,
}

impl EntryType {
    pub fn from_wire(value: u16) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::Setup),
            2 => Ok(Self::Teardown),
            3 => Ok(Self::TestCase),
            4 => Ok(Self::Before),
            5 => Ok(Self::After),
            other => Err(ProtocolError::UnknownEntryType(other)),
        }
    }
}

/// Tag of one execution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventType {
    FailedAssertion = 0,
    UncaughtException = 1,
    Inconclusiveness = 2,
    Log = 3,
}

impl EventType {
    pub fn from_wire(value: u16) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::FailedAssertion),
            1 => Ok(Self::UncaughtException),
            2 => Ok(Self::Inconclusiveness),
            3 => Ok(Self::Log),
            other => Err(ProtocolError::UnknownEventType(other)),
        }
    }
}

/// CallRoutine request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequest {
    pub address: LoadAddress,
    pub fixture_key: FixtureKey,
    pub routine_key: RoutineKey,
    pub dispositions: Dispositions,
    pub token: ContinuationToken,
}

impl CallRequest {
    pub fn encode(&self) -> [u8; CALL_REQUEST_SIZE] {
        let mut w = WireWriter::with_capacity(CALL_REQUEST_SIZE);
        w.put_u64(self.address.0);
        w.put_u16(self.fixture_key.0);
        w.put_u16(self.routine_key.0);
        w.put_u32(self.dispositions.failed_assertion.to_wire());
        w.put_u32(self.dispositions.uncaught_exception.to_wire());
        w.put_u32(0);
        w.put_u64(self.token.0);

        let mut out = [0u8; CALL_REQUEST_SIZE];
        out.copy_from_slice(w.as_slice());
        out
    }

    /// Decode and validate a request. The reserved field must be zero and
    /// both dispositions must be in range.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != CALL_REQUEST_SIZE {
            return Err(ProtocolError::Malformed(format!(
                "call request is {} bytes, expected {}",
                bytes.len(),
                CALL_REQUEST_SIZE
            )));
        }
        let view = WireView::new(bytes);
        let assertion = view.read_u32_at(12)?;
        let exception = view.read_u32_at(16)?;
        if view.read_u32_at(20)? != 0 {
            return Err(ProtocolError::Malformed("reserved field is non-zero".into()));
        }
        Ok(Self {
            address: LoadAddress(view.read_u64_at(0)?),
            fixture_key: FixtureKey(view.read_u16_at(8)?),
            routine_key: RoutineKey(view.read_u16_at(10)?),
            dispositions: Dispositions {
                failed_assertion: Disposition::from_wire(assertion)
                    .ok_or(ProtocolError::InvalidDisposition(assertion))?,
                uncaught_exception: Disposition::from_wire(exception)
                    .ok_or(ProtocolError::InvalidDisposition(exception))?,
            },
            token: ContinuationToken(view.read_u64_at(24)?),
        })
    }
}

/// Fixed header at the start of every CallRoutine response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallResponseHeader {
    pub ran_to_completion: bool,
    pub abort_run: bool,
    pub event_count: u32,
    pub truncated: bool,
    pub token: ContinuationToken,
}

impl CallResponseHeader {
    /// Write the header into the first bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) -> Result<(), ProtocolError> {
        if out.len() < CALL_RESPONSE_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: CALL_RESPONSE_HEADER_SIZE,
                available: out.len(),
            });
        }
        let mut w = WireWriter::with_capacity(CALL_RESPONSE_HEADER_SIZE);
        w.put_u8(self.ran_to_completion as u8);
        w.put_u8(self.abort_run as u8);
        w.put_u16(0);
        w.put_u32(self.event_count);
        w.put_u32(if self.truncated { RESPONSE_FLAG_TRUNCATED } else { 0 });
        w.put_u32(0);
        w.put_u64(self.token.0);
        out[..CALL_RESPONSE_HEADER_SIZE].copy_from_slice(w.as_slice());
        Ok(())
    }

    pub fn read_from(view: &WireView<'_>) -> Result<Self, ProtocolError> {
        if view.len() < CALL_RESPONSE_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: CALL_RESPONSE_HEADER_SIZE,
                available: view.len(),
            });
        }
        Ok(Self {
            ran_to_completion: view.read_u8_at(0)? != 0,
            abort_run: view.read_u8_at(1)? != 0,
            event_count: view.read_u32_at(4)?,
            truncated: view.read_u32_at(8)? & RESPONSE_FLAG_TRUNCATED != 0,
            token: ContinuationToken(view.read_u64_at(16)?),
        })
    }
}

/// Round `len` up to the event alignment.
pub fn align_event(len: usize) -> usize {
    (len + EVENT_ALIGNMENT - 1) & !(EVENT_ALIGNMENT - 1)
}
