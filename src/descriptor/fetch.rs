//! Two-phase descriptor retrieval.
//!
//! Phase one asks with a 4-byte buffer: a module without fixtures answers
//! completely, any other module answers "more data" with the exact size.
//! Phase two allocates that size plus a trailing canary word and fetches.

use super::DescriptorError;
use crate::executor::{ExecutorTransport, TransportError};
use crate::types::LoadAddress;
use crate::wire::layout::DESCRIPTOR_MIN_OUTPUT;
use crate::wire::{ControlCode, ProtocolError, WireView};

/// Word written after the fetch buffer; must survive the call.
pub const CANARY: u32 = 0x5846_4B4B;

/// Largest descriptor accepted from the executor.
pub const MAX_DESCRIPTOR_SIZE: usize = 16 * 1024 * 1024;

/// Fetch the complete descriptor of the module at `address`.
pub fn fetch_descriptor(
    transport: &dyn ExecutorTransport,
    address: LoadAddress,
) -> Result<Vec<u8>, DescriptorError> {
    let request = address.0.to_le_bytes();
    let mut first = [0u8; DESCRIPTOR_MIN_OUTPUT];

    match transport.control(ControlCode::QueryModuleDescriptor, &request, &mut first) {
        Ok(written) => {
            let view = WireView::new(&first[..written.min(first.len())]);
            let count = view.read_u32_at(0)?;
            if count != 0 {
                return Err(ProtocolError::Truncated {
                    needed: DESCRIPTOR_MIN_OUTPUT + count as usize * 4,
                    available: written,
                }
                .into());
            }
            Ok(first.to_vec())
        }
        Err(TransportError::MoreData { written }) => {
            let required = size_hint(&first, written)?;
            tracing::debug!(%address, required, "descriptor size negotiated");
            fetch_descriptor_sized(transport, address, required)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch into a buffer of exactly `size` bytes.
///
/// A buffer that is too small yields [`DescriptorError::Capacity`] carrying
/// the size the executor reports, without retrying.
pub fn fetch_descriptor_sized(
    transport: &dyn ExecutorTransport,
    address: LoadAddress,
    size: usize,
) -> Result<Vec<u8>, DescriptorError> {
    if size > MAX_DESCRIPTOR_SIZE {
        return Err(ProtocolError::Malformed(format!(
            "descriptor size {size} exceeds maximum {MAX_DESCRIPTOR_SIZE}"
        ))
        .into());
    }
    let request = address.0.to_le_bytes();
    let size = size.max(DESCRIPTOR_MIN_OUTPUT);
    let mut buffer = vec![0u8; size + 4];
    buffer[size..].copy_from_slice(&CANARY.to_le_bytes());

    let result = transport.control(ControlCode::QueryModuleDescriptor, &request, &mut buffer[..size]);

    if buffer[size..] != CANARY.to_le_bytes() {
        tracing::error!(%address, size, "descriptor buffer overrun");
        return Err(ProtocolError::Malformed("descriptor buffer overrun".into()).into());
    }

    match result {
        Ok(written) => {
            if written < size {
                return Err(ProtocolError::Truncated { needed: size, available: written }.into());
            }
            buffer.truncate(size);
            let count = WireView::new(&buffer).read_u32_at(0)? as usize;
            let table = DESCRIPTOR_MIN_OUTPUT + count * 4;
            if table > size {
                return Err(ProtocolError::Truncated { needed: table, available: size }.into());
            }
            Ok(buffer)
        }
        Err(TransportError::MoreData { written }) => Err(DescriptorError::Capacity {
            required: size_hint(&buffer[..size], written)?,
        }),
        Err(e) => Err(e.into()),
    }
}

fn size_hint(buffer: &[u8], written: usize) -> Result<usize, ProtocolError> {
    let view = WireView::new(&buffer[..written.min(buffer.len())]);
    let required = view.read_u32_at(0)? as usize;
    if required < DESCRIPTOR_MIN_OUTPUT {
        return Err(ProtocolError::Malformed(format!("size hint {required} below minimum")));
    }
    if required > MAX_DESCRIPTOR_SIZE {
        return Err(ProtocolError::Malformed(format!("size hint {required} above maximum")));
    }
    Ok(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a fixed answer, optionally scribbling past the slice it is given.
    struct Scripted {
        answer: Vec<u8>,
        claim: usize,
    }

    impl ExecutorTransport for Scripted {
        fn control(&self, _: ControlCode, _: &[u8], output: &mut [u8]) -> Result<usize, TransportError> {
            let n = self.answer.len().min(output.len());
            output[..n].copy_from_slice(&self.answer[..n]);
            Ok(self.claim)
        }
    }

    #[test]
    fn test_short_write_is_protocol_violation() {
        let transport = Scripted { answer: vec![0; 12], claim: 8 };
        let err = fetch_descriptor_sized(&transport, LoadAddress(1), 12).unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::Protocol(ProtocolError::Truncated { needed: 12, available: 8 })
        ));
    }

    #[test]
    fn test_count_beyond_size_is_protocol_violation() {
        let transport = Scripted { answer: vec![5, 0, 0, 0, 0, 0, 0, 0], claim: 8 };
        let err = fetch_descriptor_sized(&transport, LoadAddress(1), 8).unwrap_err();
        assert!(matches!(err, DescriptorError::Protocol(ProtocolError::Truncated { needed: 24, .. })));
    }

    /// Always answers "more data" with the given size hint.
    struct Hint(u32);

    impl ExecutorTransport for Hint {
        fn control(&self, _: ControlCode, _: &[u8], output: &mut [u8]) -> Result<usize, TransportError> {
            output[..4].copy_from_slice(&self.0.to_le_bytes());
            Err(TransportError::MoreData { written: 4 })
        }
    }

    #[test]
    fn test_oversized_hint_is_rejected() {
        let err = fetch_descriptor(&Hint(u32::MAX), LoadAddress(1)).unwrap_err();
        assert!(matches!(err, DescriptorError::Protocol(ProtocolError::Malformed(_))));

        let just_over = (MAX_DESCRIPTOR_SIZE + 1) as u32;
        assert!(matches!(
            fetch_descriptor(&Hint(just_over), LoadAddress(1)),
            Err(DescriptorError::Protocol(ProtocolError::Malformed(_)))
        ));
        assert!(matches!(
            fetch_descriptor_sized(&Hint(8), LoadAddress(1), MAX_DESCRIPTOR_SIZE + 1),
            Err(DescriptorError::Protocol(ProtocolError::Malformed(_)))
        ));
    }

    #[test]
    fn test_first_phase_with_fixtures_but_success_is_violation() {
        let transport = Scripted { answer: vec![1, 0, 0, 0], claim: 4 };
        assert!(matches!(
            fetch_descriptor(&transport, LoadAddress(1)),
            Err(DescriptorError::Protocol(_))
        ));
    }
}
