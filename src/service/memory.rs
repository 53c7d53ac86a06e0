//! Process-local service manager.
//!
//! Behaves like the OS service manager for the outcomes the lifecycle code
//! cares about (exists, already running, not active) and lets callers hook
//! start and stop, which is how the loopback executor learns that a module
//! has been "loaded".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ManagerError, ServiceHandle, ServiceManager};

type StartHook = Arc<dyn Fn(&str, &Path) + Send + Sync>;
type StopHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Snapshot of one registered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub display: String,
    pub binary: PathBuf,
    pub running: bool,
}

#[derive(Default)]
struct Inner {
    services: HashMap<String, ServiceState>,
    handles: HashMap<usize, String>,
    next_handle: usize,
    create_failures: HashMap<String, ManagerError>,
    start_failures: HashMap<String, ManagerError>,
    stop_failures: HashMap<String, ManagerError>,
}

#[derive(Default)]
pub struct InMemoryServiceManager {
    inner: Mutex<Inner>,
    on_start: Mutex<Option<StartHook>>,
    on_stop: Mutex<Option<StopHook>>,
}

impl InMemoryServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a service transitions to running.
    pub fn on_start(&self, hook: impl Fn(&str, &Path) + Send + Sync + 'static) {
        *self.on_start.lock() = Some(Arc::new(hook));
    }

    /// Called after a running service is stopped.
    pub fn on_stop(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_stop.lock() = Some(Arc::new(hook));
    }

    /// Make every create of `name` fail with `error`.
    pub fn fail_create(&self, name: &str, error: ManagerError) {
        self.inner.lock().create_failures.insert(name.to_string(), error);
    }

    /// Make every start of `name` fail with `error`.
    pub fn fail_start(&self, name: &str, error: ManagerError) {
        self.inner.lock().start_failures.insert(name.to_string(), error);
    }

    /// Make every stop of `name` fail with `error`.
    pub fn fail_stop(&self, name: &str, error: ManagerError) {
        self.inner.lock().stop_failures.insert(name.to_string(), error);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.create_failures.clear();
        inner.start_failures.clear();
        inner.stop_failures.clear();
    }

    pub fn service(&self, name: &str) -> Option<ServiceState> {
        self.inner.lock().services.get(name).cloned()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.service(name).map(|s| s.running).unwrap_or(false)
    }

    /// Handles issued and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.inner.lock().handles.len()
    }

    fn name_of(&self, handle: ServiceHandle) -> Result<String, ManagerError> {
        self.inner
            .lock()
            .handles
            .get(&handle.0)
            .cloned()
            .ok_or(ManagerError::Os(6))
    }

    fn issue(inner: &mut Inner, name: &str) -> ServiceHandle {
        inner.next_handle += 1;
        inner.handles.insert(inner.next_handle, name.to_string());
        ServiceHandle(inner.next_handle)
    }
}

impl ServiceManager for InMemoryServiceManager {
    fn create(&self, name: &str, display: &str, binary: &Path) -> Result<ServiceHandle, ManagerError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.create_failures.get(name) {
            return Err(*err);
        }
        if inner.services.contains_key(name) {
            return Err(ManagerError::Exists);
        }
        inner.services.insert(
            name.to_string(),
            ServiceState { display: display.to_string(), binary: binary.to_path_buf(), running: false },
        );
        Ok(Self::issue(&mut inner, name))
    }

    fn open(&self, name: &str) -> Result<ServiceHandle, ManagerError> {
        let mut inner = self.inner.lock();
        if !inner.services.contains_key(name) {
            return Err(ManagerError::DoesNotExist);
        }
        Ok(Self::issue(&mut inner, name))
    }

    fn start(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        let name = self.name_of(handle)?;
        let binary = {
            let mut inner = self.inner.lock();
            if let Some(err) = inner.start_failures.get(&name) {
                return Err(*err);
            }
            let service = inner.services.get_mut(&name).ok_or(ManagerError::DoesNotExist)?;
            if service.running {
                return Err(ManagerError::AlreadyRunning);
            }
            service.running = true;
            service.binary.clone()
        };
        let hook = self.on_start.lock().clone();
        if let Some(hook) = hook {
            hook(&name, &binary);
        }
        Ok(())
    }

    fn stop(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        let name = self.name_of(handle)?;
        {
            let mut inner = self.inner.lock();
            if let Some(err) = inner.stop_failures.get(&name) {
                return Err(*err);
            }
            let service = inner.services.get_mut(&name).ok_or(ManagerError::DoesNotExist)?;
            if !service.running {
                return Err(ManagerError::NotActive);
            }
            service.running = false;
        }
        let hook = self.on_stop.lock().clone();
        if let Some(hook) = hook {
            hook(&name);
        }
        Ok(())
    }

    fn delete(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        let name = self.name_of(handle)?;
        self.inner
            .lock()
            .services
            .remove(&name)
            .map(|_| ())
            .ok_or(ManagerError::DoesNotExist)
    }

    fn close(&self, handle: ServiceHandle) {
        self.inner.lock().handles.remove(&handle.0);
    }
}
