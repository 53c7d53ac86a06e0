//! Lifecycle of the executor and of modules under test as OS services.
//!
//! Both the executor and each module under test run as named, privileged
//! services. Starting is idempotent: an existing service is opened rather
//! than recreated, and a running one is reported as "not newly started".
//! The returned [`ServiceStart`] records what this process did so cleanup
//! undoes exactly that and nothing more.

mod locate;
mod memory;

#[cfg(windows)]
mod scm;

pub use locate::{Arch, ExecutorLocator};
pub use memory::{InMemoryServiceManager, ServiceState};

#[cfg(windows)]
pub use scm::ScmServiceManager;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorCategory;

/// Longest service name the service manager accepts, in UTF-16 units.
pub const MAX_SERVICE_NAME: usize = 256;

/// Opaque handle issued by a [`ServiceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub usize);

/// Raw outcome reported by the OS service manager.
///
/// The idempotency outcomes (`Exists`, `AlreadyRunning`, `NotActive`) are
/// consumed by the lifecycle functions and never reach callers.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("service already exists")]
    Exists,
    #[error("service does not exist")]
    DoesNotExist,
    #[error("service already running")]
    AlreadyRunning,
    #[error("service not active")]
    NotActive,
    #[error("access denied")]
    AccessDenied,
    #[error("service binary not found")]
    FileNotFound,
    #[error("more data")]
    MoreData,
    #[error("service manager error {0}")]
    Os(u32),
}

/// OS-level service manager.
pub trait ServiceManager: Send + Sync {
    fn create(&self, name: &str, display: &str, binary: &Path) -> Result<ServiceHandle, ManagerError>;
    fn open(&self, name: &str) -> Result<ServiceHandle, ManagerError>;
    fn start(&self, handle: ServiceHandle) -> Result<(), ManagerError>;
    fn stop(&self, handle: ServiceHandle) -> Result<(), ManagerError>;
    fn delete(&self, handle: ServiceHandle) -> Result<(), ManagerError>;
    fn close(&self, handle: ServiceHandle);
}

impl<T: ServiceManager + ?Sized> ServiceManager for Arc<T> {
    fn create(&self, name: &str, display: &str, binary: &Path) -> Result<ServiceHandle, ManagerError> {
        (**self).create(name, display, binary)
    }
    fn open(&self, name: &str) -> Result<ServiceHandle, ManagerError> {
        (**self).open(name)
    }
    fn start(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        (**self).start(handle)
    }
    fn stop(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        (**self).stop(handle)
    }
    fn delete(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        (**self).delete(handle)
    }
    fn close(&self, handle: ServiceHandle) {
        (**self).close(handle)
    }
}

/// Lifecycle failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("module image not found: {}", .0.display())]
    ModuleNotFound(PathBuf),

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("permission denied for service {0}")]
    PermissionDenied(String),

    #[error("service name too long ({units} units, max {max})")]
    NameTooLong { units: usize, max: usize },

    #[error("a fixture name exceeds the executor's maximum length")]
    FixtureNameTooLong,

    #[error("executor image not found; searched {0:?}")]
    ExecutorImageNotFound(Vec<PathBuf>),

    #[error("starting the executor was denied; elevated rights are required")]
    ExecutorStartDenied,

    #[error("no executor build for architecture {0}")]
    UnsupportedArchitecture(String),

    #[error("service {operation} failed: {source}")]
    Manager {
        operation: &'static str,
        #[source]
        source: ManagerError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ModuleNotFound(_) | Self::NotFound(_) | Self::ExecutorImageNotFound(_) => {
                ErrorCategory::NotFound
            }
            Self::PermissionDenied(_) | Self::ExecutorStartDenied => ErrorCategory::Permission,
            Self::NameTooLong { .. } | Self::FixtureNameTooLong => ErrorCategory::Capacity,
            Self::UnsupportedArchitecture(_) | Self::Manager { .. } | Self::Io(_) => {
                ErrorCategory::Other
            }
        }
    }
}

/// What [`start_or_open_service`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStart {
    pub handle: ServiceHandle,
    /// The service was created by this call.
    pub installed: bool,
    /// The service was started by this call.
    pub started: bool,
}

impl ServiceStart {
    /// Undo exactly what was done: stop only if started, delete only if
    /// installed. The handle is closed in every case.
    pub fn release(self, manager: &dyn ServiceManager) -> Result<(), ServiceError> {
        if self.started {
            return stop_service(manager, self.handle, self.installed);
        }
        let result = if self.installed {
            manager
                .delete(self.handle)
                .map_err(|source| ServiceError::Manager { operation: "delete", source })
        } else {
            Ok(())
        };
        manager.close(self.handle);
        result
    }
}

/// Service name for a module image: `<prefix><file stem>`.
pub fn service_name_for(prefix: &str, path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{prefix}{stem}")
}

fn check_name(name: &str) -> Result<(), ServiceError> {
    let units = name.encode_utf16().count();
    if units == 0 || units >= MAX_SERVICE_NAME {
        return Err(ServiceError::NameTooLong { units, max: MAX_SERVICE_NAME - 1 });
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf, ServiceError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Install (or open) and start the service backing `path`.
///
/// On a start failure the service is deleted again if this call created it,
/// and the handle is closed, so nothing leaks.
pub fn start_or_open_service(
    manager: &dyn ServiceManager,
    path: &Path,
    name: &str,
    display: &str,
) -> Result<ServiceStart, ServiceError> {
    check_name(name)?;
    let path = absolute(path)?;
    if !path.is_file() {
        return Err(ServiceError::ModuleNotFound(path));
    }

    let (handle, installed) = match manager.create(name, display, &path) {
        Ok(handle) => (handle, true),
        Err(ManagerError::Exists) => {
            let handle = manager.open(name).map_err(|e| map_open_error(name, e))?;
            (handle, false)
        }
        Err(ManagerError::AccessDenied) => return Err(ServiceError::PermissionDenied(name.to_string())),
        Err(source) => return Err(ServiceError::Manager { operation: "create", source }),
    };

    let started = match manager.start(handle) {
        Ok(()) => true,
        // File-not-found on start means the image is already loaded under
        // another service.
        Err(ManagerError::AlreadyRunning) | Err(ManagerError::FileNotFound) => false,
        Err(e) => {
            if installed {
                if let Err(delete_err) = manager.delete(handle) {
                    tracing::warn!(service = name, error = %delete_err, "cleanup after failed start");
                }
            }
            manager.close(handle);
            return Err(map_start_error(name, e));
        }
    };

    tracing::info!(service = name, installed, started, "service ready");
    Ok(ServiceStart { handle, installed, started })
}

/// Stop a service, optionally deleting it. Already-stopped is success; a
/// service that failed to stop is never deleted. The handle is always
/// closed.
pub fn stop_service(
    manager: &dyn ServiceManager,
    handle: ServiceHandle,
    uninstall: bool,
) -> Result<(), ServiceError> {
    let result = match manager.stop(handle) {
        Ok(()) | Err(ManagerError::NotActive) if uninstall => manager
            .delete(handle)
            .map_err(|source| ServiceError::Manager { operation: "delete", source }),
        Ok(()) | Err(ManagerError::NotActive) => Ok(()),
        Err(source) => Err(ServiceError::Manager { operation: "stop", source }),
    };
    manager.close(handle);
    result
}

/// Outcome of [`ensure_executor_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStatus {
    pub image: PathBuf,
    pub installed: bool,
    pub started: bool,
}

/// Make sure the executor service is installed and running.
///
/// The executor is left running afterwards; only the handle is closed.
pub fn ensure_executor_running(
    manager: &dyn ServiceManager,
    locator: &ExecutorLocator,
    name: &str,
    display: &str,
) -> Result<ExecutorStatus, ServiceError> {
    let image = locator.locate()?;
    let start = match start_or_open_service(manager, &image, name, display) {
        Ok(start) => start,
        Err(ServiceError::PermissionDenied(_)) => return Err(ServiceError::ExecutorStartDenied),
        Err(e) => return Err(e),
    };
    manager.close(start.handle);
    Ok(ExecutorStatus { image, installed: start.installed, started: start.started })
}

fn map_open_error(name: &str, e: ManagerError) -> ServiceError {
    match e {
        ManagerError::DoesNotExist => ServiceError::NotFound(name.to_string()),
        ManagerError::AccessDenied => ServiceError::PermissionDenied(name.to_string()),
        source => ServiceError::Manager { operation: "open", source },
    }
}

fn map_start_error(name: &str, e: ManagerError) -> ServiceError {
    match e {
        ManagerError::MoreData => ServiceError::FixtureNameTooLong,
        ManagerError::AccessDenied => ServiceError::PermissionDenied(name.to_string()),
        ManagerError::DoesNotExist => ServiceError::NotFound(name.to_string()),
        source => ServiceError::Manager { operation: "start", source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_for() {
        assert_eq!(service_name_for("kfixkr_", Path::new("sample.sys")), "kfixkr_sample");
        assert_eq!(service_name_for("p_", Path::new("dir/driver.sys")), "p_driver");
    }

    #[test]
    fn test_name_length_bound() {
        assert!(check_name("ok").is_ok());
        assert!(matches!(check_name(""), Err(ServiceError::NameTooLong { .. })));
        let long = "x".repeat(MAX_SERVICE_NAME);
        assert!(matches!(check_name(&long), Err(ServiceError::NameTooLong { .. })));
    }

    #[test]
    fn test_categories() {
        assert_eq!(ServiceError::ExecutorStartDenied.category(), ErrorCategory::Permission);
        assert_eq!(ServiceError::FixtureNameTooLong.category(), ErrorCategory::Capacity);
        assert_eq!(ServiceError::NotFound("x".into()).category(), ErrorCategory::NotFound);
    }
}
