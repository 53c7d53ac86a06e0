//! Loaded module under test.
//!
//! A [`TestModule`] is shared by cloning; the last clone to drop releases
//! the backing service. Release undoes exactly what loading did: the
//! service is stopped only if loading started it and deleted only if
//! loading installed it.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::channel::RoutineChannel;
use crate::descriptor::{build_fixtures, fetch_descriptor, DescriptorError, Fixture};
use crate::discovery::{find_load_address, DiscoveryError};
use crate::error::ErrorCategory;
use crate::harness::Harness;
use crate::service::{service_name_for, start_or_open_service, ServiceError, ServiceManager, ServiceStart};
use crate::types::LoadAddress;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl ModuleError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Service(e) => e.category(),
            Self::Discovery(e) => e.category(),
            Self::Descriptor(e) => e.category(),
        }
    }
}

/// Service started on behalf of a module; released on drop.
struct ServiceLease {
    manager: Arc<dyn ServiceManager>,
    start: ServiceStart,
    name: String,
}

impl Drop for ServiceLease {
    fn drop(&mut self) {
        match self.start.release(self.manager.as_ref()) {
            Ok(()) => tracing::info!(
                service = %self.name,
                stopped = self.start.started,
                uninstalled = self.start.installed,
                "module service released"
            ),
            Err(e) => tracing::warn!(service = %self.name, error = %e, "module service release failed"),
        }
    }
}

struct ModuleInner {
    name: String,
    address: LoadAddress,
    fixtures: Vec<Fixture>,
    channel: RoutineChannel,
    lease: Option<ServiceLease>,
}

/// Shared handle to a loaded module.
#[derive(Clone)]
pub struct TestModule {
    inner: Arc<ModuleInner>,
}

impl std::fmt::Debug for TestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestModule")
            .field("name", &self.inner.name)
            .field("address", &self.inner.address)
            .field("fixtures", &self.inner.fixtures.len())
            .finish()
    }
}

impl TestModule {
    /// Install/start the module's service, find it in the executor and
    /// read its fixtures. Any failure after the service started releases it
    /// again before returning.
    pub fn load(harness: &Harness, path: &Path) -> Result<Self, ModuleError> {
        let settings = harness.settings();
        let service = service_name_for(&settings.service_prefix, path);
        let display = service
            .strip_prefix(settings.service_prefix.as_str())
            .unwrap_or(&service)
            .to_string();

        let start = start_or_open_service(harness.services().as_ref(), path, &service, &display)?;
        let lease = ServiceLease { manager: harness.services().clone(), start, name: service };

        let address = find_load_address(harness.transport().as_ref(), harness.resolver().as_ref(), path)?;
        Self::assemble(harness, address, display, Some(lease))
    }

    /// Use a module that is already registered with the executor. No
    /// service is managed.
    pub fn attach(harness: &Harness, address: LoadAddress, name: impl Into<String>) -> Result<Self, ModuleError> {
        Self::assemble(harness, address, name.into(), None)
    }

    fn assemble(
        harness: &Harness,
        address: LoadAddress,
        name: String,
        lease: Option<ServiceLease>,
    ) -> Result<Self, ModuleError> {
        let descriptor = fetch_descriptor(harness.transport().as_ref(), address)?;
        let fixtures = build_fixtures(&descriptor, address, harness.settings().max_fixture_name)?;
        tracing::info!(module = %name, %address, fixtures = fixtures.len(), "module attached");

        Ok(Self {
            inner: Arc::new(ModuleInner {
                name,
                address,
                fixtures,
                channel: harness.channel(),
                lease,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn address(&self) -> LoadAddress {
        self.inner.address
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.inner.fixtures
    }

    pub fn fixture(&self, name: &str) -> Option<&Fixture> {
        self.inner.fixtures.iter().find(|f| f.name == name)
    }

    pub fn channel(&self) -> &RoutineChannel {
        &self.inner.channel
    }

    /// This process installed the module's service.
    pub fn installed(&self) -> bool {
        self.inner.lease.as_ref().map(|l| l.start.installed).unwrap_or(false)
    }

    /// This process started the module's service.
    pub fn started(&self) -> bool {
        self.inner.lease.as_ref().map(|l| l.start.started).unwrap_or(false)
    }

    /// Number of live handles to this module.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}
