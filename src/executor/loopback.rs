//! In-process executor speaking the real wire protocol.
//!
//! Routines are Rust closures. Each call runs the closure against a
//! [`RoutineContext`], then packs the reported events into the caller's
//! buffer exactly as a privileged executor would, including "more data"
//! answers and truncation.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::panic::Location;
use std::sync::Arc;
use std::thread::ThreadId;

use super::{ExecutorTransport, ModuleNameResolver, TransportError};
use crate::descriptor::encode::{encode_descriptor, WireEntry, WireFixture};
use crate::events::{encode_event, EventKind, ExceptionRecord, ExecutionEvent};
use crate::types::{ContinuationToken, Disposition, Dispositions, FixtureKey, LoadAddress, RoutineKey};
use crate::wire::layout::{
    LIST_MODULES_HEADER_SIZE, LIST_MODULES_MIN_OUTPUT, QUERY_DESCRIPTOR_REQUEST_SIZE,
};
use crate::wire::{
    CallRequest, CallResponseHeader, ControlCode, EntryType, WireView, CALL_RESPONSE_HEADER_SIZE,
};

const FIRST_LOAD_ADDRESS: u64 = 0xFFFF_F880_0100_0000;
const LOAD_ADDRESS_STRIDE: u64 = 0x0001_0000;

/// Marker returned by a routine whose execution was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind;

pub type RoutineResult = Result<(), Unwind>;

type RoutineFn = Arc<dyn Fn(&mut RoutineContext) -> RoutineResult + Send + Sync>;

/// What a routine sees while it runs.
pub struct RoutineContext {
    routine: String,
    token: ContinuationToken,
    dispositions: Dispositions,
    events: Vec<ExecutionEvent>,
    frames: Vec<u64>,
    abort_run: bool,
}

impl RoutineContext {
    fn new(routine: &str, token: ContinuationToken, dispositions: Dispositions) -> Self {
        Self {
            routine: routine.to_string(),
            token,
            dispositions,
            events: Vec::new(),
            frames: Vec::new(),
            abort_run: false,
        }
    }

    pub fn routine_name(&self) -> &str {
        &self.routine
    }

    pub fn token(&self) -> ContinuationToken {
        self.token
    }

    pub fn set_token(&mut self, token: ContinuationToken) {
        self.token = token;
    }

    pub fn dispositions(&self) -> Dispositions {
        self.dispositions
    }

    /// Frames attached to every event reported after this call.
    pub fn capture_frames(&mut self, frames: &[u64]) {
        self.frames = frames.to_vec();
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.report(EventKind::Log { message: message.into() });
    }

    /// Fail unless `condition` holds.
    #[track_caller]
    pub fn check(&mut self, condition: bool, expression: &str) -> RoutineResult {
        if condition {
            Ok(())
        } else {
            Err(self.fail(expression))
        }
    }

    /// Report a failed assertion at the caller's location.
    #[track_caller]
    pub fn fail(&mut self, expression: &str) -> Unwind {
        self.fail_at(Location::caller(), expression, None)
    }

    /// Report a failed assertion carrying a last-error code.
    #[track_caller]
    pub fn fail_with_last_error(&mut self, expression: &str, last_error: u32) -> Unwind {
        self.fail_at(Location::caller(), expression, Some(last_error))
    }

    pub fn inconclusive(&mut self, message: impl Into<String>) -> Unwind {
        self.report(EventKind::Inconclusiveness { message: message.into() });
        Unwind
    }

    /// Simulate an exception escaping the routine.
    pub fn raise(&mut self, record: ExceptionRecord) -> Unwind {
        self.report(EventKind::UncaughtException { record });
        if self.dispositions.uncaught_exception == Disposition::AbortRun {
            self.abort_run = true;
        }
        Unwind
    }

    fn fail_at(&mut self, location: &Location<'_>, expression: &str, last_error: Option<u32>) -> Unwind {
        self.report(EventKind::FailedAssertion {
            file: location.file().to_string(),
            routine: self.routine.clone(),
            line: location.line(),
            expression: expression.to_string(),
            last_error,
        });
        if self.dispositions.failed_assertion == Disposition::AbortRun {
            self.abort_run = true;
        }
        Unwind
    }

    fn report(&mut self, kind: EventKind) {
        self.events.push(ExecutionEvent { kind, stack_trace: self.frames.clone() });
    }
}

struct LoopbackRoutine {
    name: String,
    body: RoutineFn,
}

struct LoopbackFixture {
    key: FixtureKey,
    routines: HashMap<RoutineKey, LoopbackRoutine>,
}

/// A module as registered with the loopback executor.
pub struct LoopbackModule {
    name: String,
    resolvable: bool,
    fixtures: Vec<LoopbackFixture>,
    descriptor: Vec<u8>,
}

impl LoopbackModule {
    pub fn builder(name: impl Into<String>) -> LoopbackModuleBuilder {
        LoopbackModuleBuilder {
            name: name.into(),
            resolvable: true,
            fixtures: Vec::new(),
            descriptor: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    fn routine(&self, fixture: FixtureKey, routine: RoutineKey) -> Option<&LoopbackRoutine> {
        self.fixtures
            .iter()
            .find(|f| f.key == fixture)
            .and_then(|f| f.routines.get(&routine))
    }
}

pub struct LoopbackModuleBuilder {
    name: String,
    resolvable: bool,
    fixtures: Vec<LoopbackFixtureBuilder>,
    descriptor: Option<Vec<u8>>,
}

impl LoopbackModuleBuilder {
    /// Add a fixture. Fixture keys follow declaration order starting at 0.
    pub fn fixture(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(LoopbackFixtureBuilder) -> LoopbackFixtureBuilder,
    ) -> Self {
        let key = FixtureKey(self.fixtures.len() as u16);
        let fixture = LoopbackFixtureBuilder { key, name: name.into(), entries: Vec::new() };
        self.fixtures.push(build(fixture));
        self
    }

    /// Report no name for this module's load address.
    pub fn unresolvable(mut self) -> Self {
        self.resolvable = false;
        self
    }

    /// Serve these bytes as the descriptor instead of the encoded fixtures.
    pub fn raw_descriptor(mut self, bytes: Vec<u8>) -> Self {
        self.descriptor = Some(bytes);
        self
    }

    pub fn build(self) -> LoopbackModule {
        let wire: Vec<WireFixture> = self
            .fixtures
            .iter()
            .map(|f| WireFixture {
                key: f.key,
                name: f.name.clone(),
                entries: f
                    .entries
                    .iter()
                    .map(|(kind, key, name, _)| WireEntry { kind: *kind, key: *key, name: name.clone() })
                    .collect(),
            })
            .collect();
        let descriptor = self.descriptor.unwrap_or_else(|| encode_descriptor(&wire));

        let fixtures = self
            .fixtures
            .into_iter()
            .map(|f| LoopbackFixture {
                key: f.key,
                routines: f
                    .entries
                    .into_iter()
                    .map(|(_, key, name, body)| (key, LoopbackRoutine { name, body }))
                    .collect(),
            })
            .collect();

        LoopbackModule { name: self.name, resolvable: self.resolvable, fixtures, descriptor }
    }
}

/// Routines of one fixture. Routine keys are the entry index, so the first
/// entry has key 0.
pub struct LoopbackFixtureBuilder {
    key: FixtureKey,
    name: String,
    entries: Vec<(EntryType, RoutineKey, String, RoutineFn)>,
}

impl LoopbackFixtureBuilder {
    pub fn entry<F>(mut self, kind: EntryType, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut RoutineContext) -> RoutineResult + Send + Sync + 'static,
    {
        let key = RoutineKey(self.entries.len() as u16);
        self.entries.push((kind, key, name.into(), Arc::new(body)));
        self
    }

    pub fn setup<F>(self, body: F) -> Self
    where
        F: Fn(&mut RoutineContext) -> RoutineResult + Send + Sync + 'static,
    {
        self.entry(EntryType::Setup, "Setup", body)
    }

    pub fn teardown<F>(self, body: F) -> Self
    where
        F: Fn(&mut RoutineContext) -> RoutineResult + Send + Sync + 'static,
    {
        self.entry(EntryType::Teardown, "Teardown", body)
    }

    pub fn before<F>(self, body: F) -> Self
    where
        F: Fn(&mut RoutineContext) -> RoutineResult + Send + Sync + 'static,
    {
        self.entry(EntryType::Before, "Before", body)
    }

    pub fn after<F>(self, body: F) -> Self
    where
        F: Fn(&mut RoutineContext) -> RoutineResult + Send + Sync + 'static,
    {
        self.entry(EntryType::After, "After", body)
    }

    pub fn test_case<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut RoutineContext) -> RoutineResult + Send + Sync + 'static,
    {
        self.entry(EntryType::TestCase, name, body)
    }
}

/// One CallRoutine observed by the loopback executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub address: LoadAddress,
    pub fixture_key: FixtureKey,
    pub routine_key: RoutineKey,
    pub routine: String,
    pub token_in: ContinuationToken,
    pub token_out: ContinuationToken,
    pub thread: ThreadId,
}

struct LoopbackState {
    modules: BTreeMap<LoadAddress, Arc<LoopbackModule>>,
    next_address: u64,
}

/// In-process executor.
pub struct LoopbackExecutor {
    state: RwLock<LoopbackState>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for LoopbackExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackExecutor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LoopbackState {
                modules: BTreeMap::new(),
                next_address: FIRST_LOAD_ADDRESS,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register a module and return its load address.
    pub fn register(&self, module: LoopbackModule) -> LoadAddress {
        let mut state = self.state.write();
        let address = LoadAddress(state.next_address);
        state.next_address += LOAD_ADDRESS_STRIDE;
        state.modules.insert(address, Arc::new(module));
        tracing::debug!(%address, "loopback module registered");
        address
    }

    /// Simulate the module being unloaded.
    pub fn unregister(&self, address: LoadAddress) -> bool {
        self.state.write().modules.remove(&address).is_some()
    }

    pub fn module_count(&self) -> usize {
        self.state.read().modules.len()
    }

    /// Every CallRoutine handled so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn module(&self, address: LoadAddress) -> Option<Arc<LoopbackModule>> {
        self.state.read().modules.get(&address).cloned()
    }

    fn list_modules(&self, output: &mut [u8]) -> Result<usize, TransportError> {
        if output.len() < LIST_MODULES_MIN_OUTPUT {
            return Err(TransportError::InvalidParameter(format!(
                "module list buffer of {} bytes is below minimum {}",
                output.len(),
                LIST_MODULES_MIN_OUTPUT
            )));
        }
        let addresses: Vec<LoadAddress> = self.state.read().modules.keys().copied().collect();
        let capacity = (output.len() - LIST_MODULES_HEADER_SIZE) / 8;
        let written_count = addresses.len().min(capacity);

        output[0..4].copy_from_slice(&(addresses.len() as u32).to_le_bytes());
        output[4..8].copy_from_slice(&0u32.to_le_bytes());
        for (i, address) in addresses.iter().take(written_count).enumerate() {
            let at = LIST_MODULES_HEADER_SIZE + i * 8;
            output[at..at + 8].copy_from_slice(&address.0.to_le_bytes());
        }

        let written = LIST_MODULES_HEADER_SIZE + written_count * 8;
        if addresses.len() > capacity {
            Err(TransportError::MoreData { written })
        } else {
            Ok(written)
        }
    }

    fn query_descriptor(&self, input: &[u8], output: &mut [u8]) -> Result<usize, TransportError> {
        if input.len() != QUERY_DESCRIPTOR_REQUEST_SIZE {
            return Err(TransportError::InvalidParameter(format!(
                "descriptor query is {} bytes, expected {}",
                input.len(),
                QUERY_DESCRIPTOR_REQUEST_SIZE
            )));
        }
        if output.len() < 4 {
            return Err(TransportError::InvalidParameter("descriptor buffer below 4 bytes".into()));
        }
        let address = WireView::new(input)
            .read_u64_at(0)
            .map_err(|e| TransportError::InvalidParameter(e.to_string()))?;
        let module = self.module(LoadAddress(address)).ok_or(TransportError::NotFound)?;
        let descriptor = module.descriptor();

        if descriptor.len() > output.len() {
            output[0..4].copy_from_slice(&(descriptor.len() as u32).to_le_bytes());
            return Err(TransportError::MoreData { written: 4 });
        }
        output[..descriptor.len()].copy_from_slice(descriptor);
        Ok(descriptor.len())
    }

    fn call_routine(&self, input: &[u8], output: &mut [u8]) -> Result<usize, TransportError> {
        let request =
            CallRequest::decode(input).map_err(|e| TransportError::InvalidParameter(e.to_string()))?;
        if request.address.0 == 0 {
            return Err(TransportError::InvalidParameter("null module address".into()));
        }
        if output.len() < CALL_RESPONSE_HEADER_SIZE {
            return Err(TransportError::InvalidParameter(format!(
                "response buffer of {} bytes is below header size",
                output.len()
            )));
        }

        let module = self.module(request.address).ok_or(TransportError::NotFound)?;
        let routine = module
            .routine(request.fixture_key, request.routine_key)
            .ok_or(TransportError::NotFound)?;

        let mut ctx = RoutineContext::new(&routine.name, request.token, request.dispositions);
        let result = (routine.body)(&mut ctx);

        self.calls.lock().push(RecordedCall {
            address: request.address,
            fixture_key: request.fixture_key,
            routine_key: request.routine_key,
            routine: routine.name.clone(),
            token_in: request.token,
            token_out: ctx.token,
            thread: std::thread::current().id(),
        });

        let mut written = CALL_RESPONSE_HEADER_SIZE;
        let mut event_count = 0u32;
        let mut truncated = false;
        for event in &ctx.events {
            let bytes = encode_event(event);
            if written + bytes.len() > output.len() {
                truncated = true;
                break;
            }
            output[written..written + bytes.len()].copy_from_slice(&bytes);
            written += bytes.len();
            event_count += 1;
        }

        let header = CallResponseHeader {
            ran_to_completion: result.is_ok(),
            abort_run: ctx.abort_run,
            event_count,
            truncated,
            token: ctx.token,
        };
        header
            .write_to(output)
            .map_err(|e| TransportError::InvalidParameter(e.to_string()))?;
        Ok(written)
    }
}

impl ExecutorTransport for LoopbackExecutor {
    fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError> {
        match code {
            ControlCode::ListModules => self.list_modules(output),
            ControlCode::QueryModuleDescriptor => self.query_descriptor(input, output),
            ControlCode::CallRoutine => self.call_routine(input, output),
        }
    }
}

impl ModuleNameResolver for LoopbackExecutor {
    fn module_name(&self, address: LoadAddress) -> Option<String> {
        self.module(address)
            .filter(|m| m.resolvable)
            .map(|m| m.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CALL_REQUEST_SIZE;

    fn call(executor: &LoopbackExecutor, request: &CallRequest, buffer: usize) -> Result<(Vec<u8>, usize), TransportError> {
        let mut out = vec![0u8; buffer];
        let n = executor.control(ControlCode::CallRoutine, &request.encode(), &mut out)?;
        Ok((out, n))
    }

    fn request(address: LoadAddress, routine: u16) -> CallRequest {
        CallRequest {
            address,
            fixture_key: FixtureKey(0),
            routine_key: RoutineKey(routine),
            dispositions: Dispositions::default(),
            token: ContinuationToken::ZERO,
        }
    }

    #[test]
    fn test_routine_keys_follow_entry_order() {
        let executor = LoopbackExecutor::new();
        let address = executor.register(
            LoopbackModule::builder("m.sys")
                .fixture("F", |f| f.setup(|_| Ok(())).test_case("T", |ctx| Err(ctx.fail("nope"))))
                .build(),
        );
        let (out, _) = call(&executor, &request(address, 1), 4096).unwrap();
        let header = CallResponseHeader::read_from(&WireView::new(&out)).unwrap();
        assert!(!header.ran_to_completion);
        assert_eq!(header.event_count, 1);
        assert_eq!(executor.calls()[0].routine, "T");
    }

    #[test]
    fn test_unknown_keys_are_not_found() {
        let executor = LoopbackExecutor::new();
        let address = executor.register(
            LoopbackModule::builder("m.sys").fixture("F", |f| f.test_case("T", |_| Ok(()))).build(),
        );
        assert_eq!(call(&executor, &request(address, 9), 64).unwrap_err(), TransportError::NotFound);
        assert_eq!(
            call(&executor, &request(LoadAddress(1), 0), 64).unwrap_err(),
            TransportError::NotFound
        );
    }

    #[test]
    fn test_structurally_invalid_requests() {
        let executor = LoopbackExecutor::new();
        let err = call(&executor, &request(LoadAddress(0), 0), 64).unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter(_)));

        let mut bytes = request(LoadAddress(5), 0).encode();
        bytes[16] = 7;
        let mut out = [0u8; 64];
        let err = executor.control(ControlCode::CallRoutine, &bytes, &mut out).unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter(_)));

        let err = executor
            .control(ControlCode::CallRoutine, &bytes[..CALL_REQUEST_SIZE - 1], &mut out)
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter(_)));
    }

    #[test]
    fn test_abort_disposition_sets_flag() {
        let executor = LoopbackExecutor::new();
        let address = executor.register(
            LoopbackModule::builder("m.sys")
                .fixture("F", |f| f.test_case("T", |ctx| ctx.check(false, "1 == 2")))
                .build(),
        );
        let mut req = request(address, 0);
        req.dispositions.failed_assertion = Disposition::AbortRun;
        let (out, _) = call(&executor, &req, 4096).unwrap();
        let header = CallResponseHeader::read_from(&WireView::new(&out)).unwrap();
        assert!(header.abort_run);
        assert!(!header.ran_to_completion);
    }

    #[test]
    fn test_resolver_honours_unresolvable() {
        let executor = LoopbackExecutor::new();
        let hidden = executor.register(LoopbackModule::builder("hidden.sys").unresolvable().build());
        let shown = executor.register(LoopbackModule::builder("shown.sys").build());
        assert_eq!(executor.module_name(hidden), None);
        assert_eq!(executor.module_name(shown).as_deref(), Some("shown.sys"));
        assert!(executor.unregister(shown));
        assert_eq!(executor.module_name(shown), None);
    }
}
