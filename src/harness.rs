//! Wiring of the executor transport, name resolver and service manager.

use std::path::Path;
use std::sync::Arc;

use crate::channel::{RoutineChannel, DEFAULT_RESPONSE_BUFFER};
use crate::discovery::{list_modules, DiscoveryError};
use crate::executor::{ExecutorTransport, ModuleNameResolver};
use crate::module::{ModuleError, TestModule};
use crate::service::{ensure_executor_running, ExecutorLocator, ExecutorStatus, ServiceError, ServiceManager};
use crate::types::LoadAddress;

/// Settings that shape how modules are loaded and called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    /// CallRoutine response buffer in bytes.
    pub response_buffer: usize,
    /// Longest fixture or routine name accepted, in UTF-16 units.
    pub max_fixture_name: usize,
    /// Prefix of the service created for each module under test.
    pub service_prefix: String,
    pub executor_service: String,
    pub executor_display: String,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            response_buffer: DEFAULT_RESPONSE_BUFFER,
            max_fixture_name: 63,
            service_prefix: "kfixkr_".to_string(),
            executor_service: "kfixkr".to_string(),
            executor_display: "Kfix Kernel Reflector".to_string(),
        }
    }
}

/// Everything needed to load modules and run their routines.
#[derive(Clone)]
pub struct Harness {
    transport: Arc<dyn ExecutorTransport>,
    resolver: Arc<dyn ModuleNameResolver>,
    services: Arc<dyn ServiceManager>,
    settings: HarnessSettings,
}

impl Harness {
    pub fn new(
        transport: Arc<dyn ExecutorTransport>,
        resolver: Arc<dyn ModuleNameResolver>,
        services: Arc<dyn ServiceManager>,
        settings: HarnessSettings,
    ) -> Self {
        Self { transport, resolver, services, settings }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn ExecutorTransport> {
        &self.transport
    }

    pub fn resolver(&self) -> &Arc<dyn ModuleNameResolver> {
        &self.resolver
    }

    pub fn services(&self) -> &Arc<dyn ServiceManager> {
        &self.services
    }

    pub fn channel(&self) -> RoutineChannel {
        RoutineChannel::new(self.transport.clone(), self.settings.response_buffer)
    }

    /// Install and start the executor if needed.
    pub fn ensure_executor(&self, locator: &ExecutorLocator) -> Result<ExecutorStatus, ServiceError> {
        ensure_executor_running(
            self.services.as_ref(),
            locator,
            &self.settings.executor_service,
            &self.settings.executor_display,
        )
    }

    pub fn list_modules(&self) -> Result<Vec<LoadAddress>, DiscoveryError> {
        list_modules(self.transport.as_ref())
    }

    pub fn load_module(&self, path: &Path) -> Result<TestModule, ModuleError> {
        TestModule::load(self, path)
    }

    pub fn attach_module(&self, address: LoadAddress, name: &str) -> Result<TestModule, ModuleError> {
        TestModule::attach(self, address, name)
    }
}
