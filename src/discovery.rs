//! Discovery of modules registered with the executor.
//!
//! The executor's registration list has no known size up front. The query
//! starts with room for one address; a "more data" answer carries the exact
//! total, which sizes the second attempt.

use std::path::Path;
use thiserror::Error;

use crate::error::ErrorCategory;
use crate::executor::{ExecutorTransport, ModuleNameResolver, TransportError};
use crate::types::LoadAddress;
use crate::wire::layout::LIST_MODULES_HEADER_SIZE;
use crate::wire::{ControlCode, ProtocolError, WireView};

/// Registrations may change between the sizing query and the fetch; give up
/// after this many rounds.
const MAX_LIST_ATTEMPTS: usize = 4;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no registered module matches {0}")]
    UnknownLoadAddress(String),

    #[error("module list kept growing over {0} attempts")]
    ListUnstable(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl DiscoveryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownLoadAddress(_) => ErrorCategory::NotFound,
            Self::ListUnstable(_) => ErrorCategory::Capacity,
            Self::Transport(e) => e.category(),
            Self::Protocol(_) => ErrorCategory::ProtocolViolation,
        }
    }
}

/// Load addresses of every module currently registered with the executor.
pub fn list_modules(transport: &dyn ExecutorTransport) -> Result<Vec<LoadAddress>, DiscoveryError> {
    let mut capacity = 1usize;

    for attempt in 1..=MAX_LIST_ATTEMPTS {
        let mut buffer = vec![0u8; LIST_MODULES_HEADER_SIZE + capacity * 8];
        match transport.control(ControlCode::ListModules, &[], &mut buffer) {
            Ok(written) => return parse_list(&buffer, written),
            Err(TransportError::MoreData { written }) => {
                let view = WireView::new(&buffer[..written.min(buffer.len())]);
                let total = view.read_u32_at(0)? as usize;
                if total <= capacity {
                    return Err(ProtocolError::Malformed(format!(
                        "more data reported for {total} modules with room for {capacity}"
                    ))
                    .into());
                }
                tracing::debug!(attempt, total, "growing module list buffer");
                capacity = total;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(DiscoveryError::ListUnstable(MAX_LIST_ATTEMPTS))
}

fn parse_list(buffer: &[u8], written: usize) -> Result<Vec<LoadAddress>, DiscoveryError> {
    let view = WireView::new(buffer.get(..written).ok_or(ProtocolError::Truncated {
        needed: written,
        available: buffer.len(),
    })?);
    let count = view.read_u32_at(0)? as usize;
    let needed = LIST_MODULES_HEADER_SIZE + count * 8;
    if view.len() < needed {
        return Err(ProtocolError::Truncated { needed, available: view.len() }.into());
    }
    let mut cursor = view.cursor_at(LIST_MODULES_HEADER_SIZE);
    let mut addresses = Vec::with_capacity(count);
    for _ in 0..count {
        addresses.push(LoadAddress(cursor.read_u64()?));
    }
    Ok(addresses)
}

/// Base file name of a path in either separator convention.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Resolve an on-disk module path to its load address.
///
/// Candidates match on base file name, ignoring case. Addresses whose name
/// cannot be resolved are skipped.
pub fn find_load_address(
    transport: &dyn ExecutorTransport,
    resolver: &dyn ModuleNameResolver,
    path: &Path,
) -> Result<LoadAddress, DiscoveryError> {
    let path_str = path.to_string_lossy();
    let wanted = base_name(&path_str).to_lowercase();

    for address in list_modules(transport)? {
        match resolver.module_name(address) {
            Some(name) if base_name(&name).to_lowercase() == wanted => {
                tracing::debug!(%address, module = %name, "load address resolved");
                return Ok(address);
            }
            Some(_) => {}
            None => tracing::debug!(%address, "skipping unresolvable module"),
        }
    }

    Err(DiscoveryError::UnknownLoadAddress(base_name(&path_str).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(r"C:\tests\Sample.SYS"), "Sample.SYS");
        assert_eq!(base_name("dir/sample.sys"), "sample.sys");
        assert_eq!(base_name("sample.sys"), "sample.sys");
    }

    #[test]
    fn test_parse_list_rejects_short_response() {
        let mut buffer = vec![0u8; 16];
        buffer[0] = 2;
        let err = parse_list(&buffer, 16).unwrap_err();
        assert!(matches!(err, DiscoveryError::Protocol(ProtocolError::Truncated { needed: 24, .. })));
    }

    #[test]
    fn test_parse_list_written_beyond_buffer() {
        let buffer = vec![0u8; 16];
        assert!(parse_list(&buffer, 32).is_err());
    }
}
