//! Fuzz target for CallRoutine response decoding.
//!
//! Arbitrary response bytes must decode to events or an error, never panic
//! or read outside the buffer.

#![no_main]

use kfix::events::decode_events;
use kfix::wire::{CallResponseHeader, WireView};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let view = WireView::new(data);
    if let Ok(header) = CallResponseHeader::read_from(&view) {
        let _ = decode_events(&view, &header);
    }
});
