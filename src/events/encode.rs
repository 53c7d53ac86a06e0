//! Wire encoding of execution events.
//!
//! ```text
//! 0   type:u16 size:u16 frame_count:u16 reserved:u16
//! 8   info block (48 bytes, layout depends on type)
//! 56  frames:u64[frame_count]
//! ..  strings, offsets relative to the event start
//! ```
//!
//! The whole record is padded to 8 bytes and `size` includes the padding.

use super::{EventKind, ExceptionRecord, ExecutionEvent};
use crate::wire::layout::{align_event, EventType, EVENT_FIXED_SIZE, EVENT_HEADER_SIZE};
use crate::wire::WireWriter;

/// Longest string carried per field; longer strings are cut.
pub const MAX_EVENT_STRING_UNITS: usize = 4096;
/// Deepest stack trace carried per event.
pub const MAX_STACK_FRAMES: usize = 64;

const EXCEPTION_NARROW: u32 = 1;
const EXCEPTION_WIDE: u32 = 2;

/// Encode one event. The result always fits the 16-bit size field.
pub fn encode_event(event: &ExecutionEvent) -> Vec<u8> {
    let frames = &event.stack_trace[..event.stack_trace.len().min(MAX_STACK_FRAMES)];

    let mut w = WireWriter::with_capacity(EVENT_FIXED_SIZE + frames.len() * 8);
    w.put_u16(event_type(&event.kind) as u16);
    w.put_u16(0);
    w.put_u16(frames.len() as u16);
    w.put_u16(0);
    w.put_zeros(EVENT_FIXED_SIZE - EVENT_HEADER_SIZE);
    for frame in frames {
        w.put_u64(*frame);
    }

    let info = EVENT_HEADER_SIZE;
    match &event.kind {
        EventKind::FailedAssertion { file, routine, line, expression, last_error } => {
            w.patch_u32(info, *line);
            w.patch_u32(info + 4, last_error.unwrap_or(0));
            w.patch_u32(info + 8, u32::from(last_error.is_some()));
            put_string(&mut w, info + 12, file);
            put_string(&mut w, info + 16, routine);
            put_string(&mut w, info + 20, expression);
        }
        EventKind::UncaughtException { record } => write_exception(&mut w, info, record),
        EventKind::Inconclusiveness { message } | EventKind::Log { message } => {
            put_string(&mut w, info, message);
        }
    }

    w.align_to(8);
    let size = align_event(w.len());
    w.patch_u16(2, size as u16);
    w.into_bytes()
}

fn event_type(kind: &EventKind) -> EventType {
    match kind {
        EventKind::FailedAssertion { .. } => EventType::FailedAssertion,
        EventKind::UncaughtException { .. } => EventType::UncaughtException,
        EventKind::Inconclusiveness { .. } => EventType::Inconclusiveness,
        EventKind::Log { .. } => EventType::Log,
    }
}

/// Append `s` and patch its (offset, length) pair at `slot`.
fn put_string(w: &mut WireWriter, slot: usize, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(MAX_EVENT_STRING_UNITS).collect();
    let offset = w.len();
    let length = w.put_utf16(&units);
    w.patch_u16(slot, offset as u16);
    w.patch_u16(slot + 2, length as u16);
}

fn write_exception(w: &mut WireWriter, info: usize, record: &ExceptionRecord) {
    match *record {
        ExceptionRecord::Narrow { code, flags, record, address, parameter_count } => {
            w.patch_u32(info, EXCEPTION_NARROW);
            w.patch_u32(info + 8, code);
            w.patch_u32(info + 12, flags);
            w.patch_u32(info + 16, record);
            w.patch_u32(info + 20, address);
            w.patch_u32(info + 24, parameter_count);
        }
        ExceptionRecord::Wide { code, flags, record, address, parameter_count } => {
            w.patch_u32(info, EXCEPTION_WIDE);
            w.patch_u32(info + 8, code);
            w.patch_u32(info + 12, flags);
            w.patch_u32(info + 16, record as u32);
            w.patch_u32(info + 20, (record >> 32) as u32);
            w.patch_u32(info + 24, address as u32);
            w.patch_u32(info + 28, (address >> 32) as u32);
            w.patch_u32(info + 32, parameter_count);
        }
    }
}
