//! Module discovery against the loopback executor and scripted transports.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use kfix::discovery::{base_name, find_load_address, list_modules, DiscoveryError};
use kfix::executor::{ExecutorTransport, LoopbackExecutor, LoopbackModule, TransportError};
use kfix::wire::ControlCode;
use kfix::LoadAddress;

fn empty(name: &str) -> LoopbackModule {
    LoopbackModule::builder(name).build()
}

#[test]
fn test_list_grows_past_initial_capacity() {
    let executor = LoopbackExecutor::new();
    let registered: Vec<LoadAddress> = (0..5).map(|i| executor.register(empty(&format!("m{i}.sys")))).collect();

    let listed = list_modules(&executor).unwrap();
    assert_eq!(listed, registered);
}

#[test]
fn test_empty_list() {
    let executor = LoopbackExecutor::new();
    assert!(list_modules(&executor).unwrap().is_empty());
}

#[test]
fn test_find_skips_unresolvable_and_ignores_case() {
    let executor = LoopbackExecutor::new();
    executor.register(LoopbackModule::builder("hidden.sys").unresolvable().build());
    executor.register(empty("other.sys"));
    let wanted = executor.register(empty(r"\SystemRoot\System32\Drivers\Sample.SYS"));

    let found = find_load_address(&executor, &executor, Path::new("/tmp/build/sample.sys")).unwrap();
    assert_eq!(found, wanted);
}

#[test]
fn test_unresolvable_target_is_not_found() {
    let executor = LoopbackExecutor::new();
    executor.register(LoopbackModule::builder("sample.sys").unresolvable().build());

    let err = find_load_address(&executor, &executor, Path::new("sample.sys")).unwrap_err();
    assert!(matches!(err, DiscoveryError::UnknownLoadAddress(ref n) if n == "sample.sys"));
}

#[test]
fn test_base_name_handles_both_separators() {
    assert_eq!(base_name(r"C:\drivers\a.sys"), "a.sys");
    assert_eq!(base_name("/lib/modules/b.ko"), "b.ko");
    assert_eq!(base_name("plain.sys"), "plain.sys");
}

/// Claims one more module than the buffer can hold every time.
struct EverGrowing {
    calls: AtomicU32,
}

impl ExecutorTransport for EverGrowing {
    fn control(&self, code: ControlCode, _input: &[u8], output: &mut [u8]) -> Result<usize, TransportError> {
        assert_eq!(code, ControlCode::ListModules);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let capacity = (output.len() - 8) / 8;
        output[0..4].copy_from_slice(&((capacity + 1) as u32).to_le_bytes());
        Err(TransportError::MoreData { written: 8 })
    }
}

#[test]
fn test_unstable_list_gives_up() {
    let transport = EverGrowing { calls: AtomicU32::new(0) };
    let err = list_modules(&transport).unwrap_err();
    assert!(matches!(err, DiscoveryError::ListUnstable(_)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
}

/// Reports more entries than it wrote.
struct ShortList;

impl ExecutorTransport for ShortList {
    fn control(&self, _: ControlCode, _: &[u8], output: &mut [u8]) -> Result<usize, TransportError> {
        output[0..4].copy_from_slice(&1u32.to_le_bytes());
        Ok(8)
    }
}

#[test]
fn test_count_beyond_written_bytes_is_rejected() {
    assert!(matches!(list_modules(&ShortList), Err(DiscoveryError::Protocol(_))));
}

struct Denied;

impl ExecutorTransport for Denied {
    fn control(&self, _: ControlCode, _: &[u8], _: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::AccessDenied)
    }
}

#[test]
fn test_transport_errors_propagate() {
    let err = list_modules(&Denied).unwrap_err();
    assert!(matches!(err, DiscoveryError::Transport(TransportError::AccessDenied)));
}
