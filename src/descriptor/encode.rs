//! Wire form of a module descriptor.
//!
//! ```text
//! 0       fixture_count:u32
//! 4       fixture_offset:u32[fixture_count]
//! ..      fixture blocks:
//!           key:u16 reserved:u16 entry_count:u32 name_offset:u32 name_length:u32
//!           entries[entry_count]: type:u16 key:u16 name_offset:u32 name_length:u32
//! ..      strings (UTF-16LE, unterminated)
//! ```
//!
//! All offsets are relative to the start of the descriptor.

use crate::types::{FixtureKey, RoutineKey};
use crate::wire::layout::{FIXTURE_BLOCK_HEADER_SIZE, FIXTURE_ENTRY_SIZE};
use crate::wire::{EntryType, WireWriter};

/// One entry as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEntry {
    pub kind: EntryType,
    pub key: RoutineKey,
    pub name: String,
}

/// One fixture block as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFixture {
    pub key: FixtureKey,
    pub name: String,
    pub entries: Vec<WireEntry>,
}

/// Serialize fixtures into a self-relative descriptor.
pub fn encode_descriptor(fixtures: &[WireFixture]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.put_u32(fixtures.len() as u32);
    let offsets_at = w.len();
    w.put_zeros(fixtures.len() * 4);

    // (slot of the offset/length pair, string) patched once strings land.
    let mut names: Vec<(usize, &str)> = Vec::new();

    for (index, fixture) in fixtures.iter().enumerate() {
        w.patch_u32(offsets_at + index * 4, w.len() as u32);
        let block = w.len();
        w.put_u16(fixture.key.0);
        w.put_u16(0);
        w.put_u32(fixture.entries.len() as u32);
        w.put_zeros(8);
        names.push((block + 8, fixture.name.as_str()));

        for entry in &fixture.entries {
            let at = w.len();
            w.put_u16(entry.kind as u16);
            w.put_u16(entry.key.0);
            w.put_zeros(8);
            names.push((at + 4, entry.name.as_str()));
        }
        debug_assert_eq!(
            w.len() - block,
            FIXTURE_BLOCK_HEADER_SIZE + FIXTURE_ENTRY_SIZE * fixture.entries.len()
        );
    }

    for (slot, name) in names {
        let units: Vec<u16> = name.encode_utf16().collect();
        let offset = w.len();
        let length = w.put_utf16(&units);
        w.patch_u32(slot, offset as u32);
        w.patch_u32(slot + 4, length as u32);
    }

    w.into_bytes()
}
