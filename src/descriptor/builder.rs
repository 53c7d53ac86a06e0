//! Turns a raw descriptor into [`Fixture`] records.
//!
//! Names are unterminated UTF-16LE on the wire. Every length is checked for
//! parity, against the buffer and against the maximum name length before
//! anything is copied. Construction is all-or-nothing: the first error drops
//! every fixture built so far.

use super::model::{Fixture, RoutineRole, TestCase};
use super::DescriptorError;
use crate::types::{FixtureKey, LoadAddress, RoutineKey};
use crate::wire::layout::{DESCRIPTOR_MIN_OUTPUT, FIXTURE_BLOCK_HEADER_SIZE, FIXTURE_ENTRY_SIZE};
use crate::wire::{EntryType, ProtocolError, WireView};

/// Parse every fixture of the module at `module`.
pub fn build_fixtures(
    descriptor: &[u8],
    module: LoadAddress,
    max_name_units: usize,
) -> Result<Vec<Fixture>, DescriptorError> {
    let view = WireView::new(descriptor);
    let count = view.read_u32_at(0)? as usize;
    view.bytes_at(DESCRIPTOR_MIN_OUTPUT, count * 4)?;

    let mut fixtures = Vec::with_capacity(count);
    for index in 0..count {
        let offset = view.read_u32_at(DESCRIPTOR_MIN_OUTPUT + index * 4)? as usize;
        fixtures.push(build_fixture(&view, offset, module, max_name_units)?);
    }
    Ok(fixtures)
}

fn build_fixture(
    view: &WireView<'_>,
    offset: usize,
    module: LoadAddress,
    max_name_units: usize,
) -> Result<Fixture, DescriptorError> {
    let mut header = view.sub_view(offset, FIXTURE_BLOCK_HEADER_SIZE)?.cursor_at(0);
    let key = FixtureKey(header.read_u16()?);
    header.skip(2)?;
    let entry_count = header.read_u32()? as usize;
    let name_offset = header.read_u32()? as usize;
    let name_length = header.read_u32()? as usize;

    let entries_at = offset + FIXTURE_BLOCK_HEADER_SIZE;
    let entries = view.sub_view(entries_at, entry_count * FIXTURE_ENTRY_SIZE)?;
    let name = read_name(view, name_offset, name_length, max_name_units)?;
    let mut fixture = Fixture::new(name, key, module);

    for index in 0..entry_count {
        let mut entry = entries.cursor_at(index * FIXTURE_ENTRY_SIZE);
        let kind = EntryType::from_wire(entry.read_u16()?)?;
        let routine = RoutineKey(entry.read_u16()?);
        let entry_name_offset = entry.read_u32()? as usize;
        let entry_name_length = entry.read_u32()? as usize;

        let role = match kind {
            EntryType::Setup => RoutineRole::Setup,
            EntryType::Teardown => RoutineRole::Teardown,
            EntryType::Before => RoutineRole::Before,
            EntryType::After => RoutineRole::After,
            EntryType::TestCase => {
                let name = read_name(view, entry_name_offset, entry_name_length, max_name_units)?;
                fixture.test_cases.push(TestCase { name, routine, fixture: key });
                continue;
            }
        };

        if fixture.routine(role).is_some() {
            tracing::warn!(fixture = %fixture.name, %role, "duplicate special routine");
            return Err(DescriptorError::DuplicateSpecialRoutine(role));
        }
        *fixture.slot_mut(role) = Some(routine);
    }

    Ok(fixture)
}

fn read_name(
    view: &WireView<'_>,
    offset: usize,
    length: usize,
    max_units: usize,
) -> Result<String, ProtocolError> {
    if length % 2 != 0 {
        return Err(ProtocolError::OddStringLength(length));
    }
    if length / 2 > max_units {
        return Err(ProtocolError::NameTooLong { units: length / 2, max: max_units });
    }
    view.read_str_at(offset, length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::encode::{encode_descriptor, WireEntry, WireFixture};

    const ADDR: LoadAddress = LoadAddress(0xFFFF_F880_0100_0000);

    fn entry(kind: EntryType, key: u16, name: &str) -> WireEntry {
        WireEntry { kind, key: RoutineKey(key), name: name.into() }
    }

    fn sample() -> WireFixture {
        WireFixture {
            key: FixtureKey(4),
            name: "SampleFixture1".into(),
            entries: vec![
                entry(EntryType::Setup, 0, "Setup"),
                entry(EntryType::Teardown, 1, "Teardown"),
                entry(EntryType::TestCase, 2, "Test01"),
                entry(EntryType::TestCase, 3, "Test02"),
            ],
        }
    }

    #[test]
    fn test_sample_fixture() {
        let fixtures = build_fixtures(&encode_descriptor(&[sample()]), ADDR, 63).unwrap();
        assert_eq!(fixtures.len(), 1);
        let f = &fixtures[0];
        assert_eq!(f.name, "SampleFixture1");
        assert_eq!(f.key, FixtureKey(4));
        assert_eq!(f.module, ADDR);
        assert_eq!(f.setup, Some(RoutineKey(0)));
        assert_eq!(f.teardown, Some(RoutineKey(1)));
        assert_eq!(f.before, None);
        assert_eq!(f.after, None);
        let names: Vec<_> = f.test_cases.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Test01", "Test02"]);
        assert!(f.test_cases.iter().all(|t| t.routine.0 != 0 && t.fixture == f.key));
    }

    #[test]
    fn test_duplicate_setup_rejected() {
        let mut dup = sample();
        dup.entries.push(entry(EntryType::Setup, 9, "Setup2"));
        let good = WireFixture { key: FixtureKey(0), name: "Good".into(), entries: vec![] };
        let err = build_fixtures(&encode_descriptor(&[good, dup]), ADDR, 63).unwrap_err();
        assert!(matches!(err, DescriptorError::DuplicateSpecialRoutine(RoutineRole::Setup)));
    }

    #[test]
    fn test_each_special_role_is_unique() {
        for (kind, role) in [
            (EntryType::Teardown, RoutineRole::Teardown),
            (EntryType::Before, RoutineRole::Before),
            (EntryType::After, RoutineRole::After),
        ] {
            let fixture = WireFixture {
                key: FixtureKey(0),
                name: "F".into(),
                entries: vec![entry(kind, 0, "a"), entry(kind, 1, "b")],
            };
            match build_fixtures(&encode_descriptor(&[fixture]), ADDR, 63) {
                Err(DescriptorError::DuplicateSpecialRoutine(r)) => assert_eq!(r, role),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_name_too_long() {
        let fixture = WireFixture { key: FixtureKey(0), name: "x".repeat(64), entries: vec![] };
        let err = build_fixtures(&encode_descriptor(&[fixture]), ADDR, 63).unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::Protocol(ProtocolError::NameTooLong { units: 64, max: 63 })
        ));
    }

    #[test]
    fn test_name_offset_out_of_bounds() {
        let mut bytes = encode_descriptor(&[sample()]);
        // Fixture name_offset lives at block + 8; the block starts at 8.
        bytes[16..20].copy_from_slice(&0xFFFFu32.to_le_bytes());
        let err = build_fixtures(&bytes, ADDR, 63).unwrap_err();
        assert!(matches!(err, DescriptorError::Protocol(ProtocolError::OutOfBounds { .. })));
    }

    #[test]
    fn test_entry_count_beyond_buffer() {
        let mut bytes = encode_descriptor(&[sample()]);
        bytes[12..16].copy_from_slice(&1000u32.to_le_bytes());
        assert!(build_fixtures(&bytes, ADDR, 63).is_err());
    }

    #[test]
    fn test_unknown_entry_type() {
        let mut bytes = encode_descriptor(&[sample()]);
        bytes[24] = 42;
        let err = build_fixtures(&bytes, ADDR, 63).unwrap_err();
        assert!(matches!(err, DescriptorError::Protocol(ProtocolError::UnknownEntryType(42))));
    }

    #[test]
    fn test_fixture_table_beyond_buffer() {
        let bytes = [3u8, 0, 0, 0, 8, 0, 0, 0];
        assert!(build_fixtures(&bytes, ADDR, 63).is_err());
    }
}
