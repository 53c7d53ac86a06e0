//! Translation of wire events into owned records.
//!
//! Every string is copied out of the response buffer, so the returned
//! events outlive it. Anything inconsistent with the declared sizes is a
//! decode error; the translator never reads past an event's own bounds.

use super::{EventKind, ExceptionRecord, ExecutionEvent};
use crate::wire::layout::{EventType, CALL_RESPONSE_HEADER_SIZE, EVENT_FIXED_SIZE, EVENT_HEADER_SIZE};
use crate::wire::{CallResponseHeader, ProtocolError, WireView};

const EXCEPTION_NARROW: u32 = 1;
const EXCEPTION_WIDE: u32 = 2;

/// Decode the events following a CallRoutine response header.
///
/// `response` must cover exactly the bytes the executor reported as written.
pub fn decode_events(
    response: &WireView<'_>,
    header: &CallResponseHeader,
) -> Result<Vec<ExecutionEvent>, ProtocolError> {
    let mut events = Vec::with_capacity(header.event_count.min(256) as usize);
    let mut offset = CALL_RESPONSE_HEADER_SIZE;

    for _ in 0..header.event_count {
        if response.len() < offset + EVENT_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: offset + EVENT_HEADER_SIZE,
                available: response.len(),
            });
        }
        let size = response.read_u16_at(offset + 2)? as usize;
        if size < EVENT_FIXED_SIZE {
            return Err(ProtocolError::Malformed(format!(
                "event at offset {offset} declares size {size}"
            )));
        }
        let event_view = response.sub_view(offset, size)?;
        events.push(decode_event(&event_view)?);
        offset += size;
    }

    Ok(events)
}

/// Decode one event; `view` spans exactly the event's declared size.
pub fn decode_event(view: &WireView<'_>) -> Result<ExecutionEvent, ProtocolError> {
    let mut cursor = view.cursor_at(0);
    let event_type = EventType::from_wire(cursor.read_u16()?)?;
    let _size = cursor.read_u16()?;
    let frame_count = cursor.read_u16()? as usize;

    let frames_bytes = frame_count * 8;
    view.bytes_at(EVENT_FIXED_SIZE, frames_bytes)?;
    let mut stack_trace = Vec::with_capacity(frame_count);
    let mut frames = view.cursor_at(EVENT_FIXED_SIZE);
    for _ in 0..frame_count {
        stack_trace.push(frames.read_u64()?);
    }

    let info = EVENT_HEADER_SIZE;
    let kind = match event_type {
        EventType::FailedAssertion => {
            let line = view.read_u32_at(info)?;
            let last_error = view.read_u32_at(info + 4)?;
            let flags = view.read_u32_at(info + 8)?;
            EventKind::FailedAssertion {
                file: string_at(view, info + 12)?,
                routine: string_at(view, info + 16)?,
                line,
                expression: string_at(view, info + 20)?,
                last_error: (flags & 1 != 0).then_some(last_error),
            }
        }
        EventType::UncaughtException => EventKind::UncaughtException {
            record: exception_at(view, info)?,
        },
        EventType::Inconclusiveness => EventKind::Inconclusiveness {
            message: string_at(view, info)?,
        },
        EventType::Log => EventKind::Log {
            message: string_at(view, info)?,
        },
    };

    Ok(ExecutionEvent { kind, stack_trace })
}

/// Read the (offset:u16, length:u16) pair at `slot` and copy the string.
fn string_at(view: &WireView<'_>, slot: usize) -> Result<String, ProtocolError> {
    let offset = view.read_u16_at(slot)? as usize;
    let length = view.read_u16_at(slot + 2)? as usize;
    view.read_str_at(offset, length)
}

fn exception_at(view: &WireView<'_>, info: usize) -> Result<ExceptionRecord, ProtocolError> {
    let kind = view.read_u32_at(info)?;
    let code = view.read_u32_at(info + 8)?;
    let flags = view.read_u32_at(info + 12)?;
    match kind {
        EXCEPTION_NARROW => Ok(ExceptionRecord::Narrow {
            code,
            flags,
            record: view.read_u32_at(info + 16)?,
            address: view.read_u32_at(info + 20)?,
            parameter_count: view.read_u32_at(info + 24)?,
        }),
        EXCEPTION_WIDE => Ok(ExceptionRecord::Wide {
            code,
            flags,
            record: view.read_u64_at(info + 16)?,
            address: view.read_u64_at(info + 24)?,
            parameter_count: view.read_u32_at(info + 32)?,
        }),
        other => Err(ProtocolError::UnknownExceptionKind(other)),
    }
}
