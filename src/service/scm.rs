//! Windows service control manager backend.

use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA,
    ERROR_SERVICE_ALREADY_RUNNING, ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_EXISTS,
    ERROR_SERVICE_NOT_ACTIVE,
};
use windows_sys::Win32::System::Services::{
    CloseServiceHandle, ControlService, CreateServiceW, DeleteService, OpenSCManagerW,
    OpenServiceW, StartServiceW, SC_HANDLE, SC_MANAGER_ALL_ACCESS, SERVICE_ALL_ACCESS,
    SERVICE_CONTROL_STOP, SERVICE_DEMAND_START, SERVICE_ERROR_NORMAL, SERVICE_KERNEL_DRIVER,
    SERVICE_STATUS,
};

use super::{ManagerError, ServiceHandle, ServiceManager};

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn last_error() -> ManagerError {
    // SAFETY: no preconditions.
    match unsafe { GetLastError() } {
        ERROR_SERVICE_EXISTS => ManagerError::Exists,
        ERROR_SERVICE_DOES_NOT_EXIST => ManagerError::DoesNotExist,
        ERROR_SERVICE_ALREADY_RUNNING => ManagerError::AlreadyRunning,
        ERROR_SERVICE_NOT_ACTIVE => ManagerError::NotActive,
        ERROR_ACCESS_DENIED => ManagerError::AccessDenied,
        ERROR_FILE_NOT_FOUND => ManagerError::FileNotFound,
        ERROR_MORE_DATA => ManagerError::MoreData,
        other => ManagerError::Os(other),
    }
}

/// Kernel-driver services through the local SCM.
pub struct ScmServiceManager {
    scm: SC_HANDLE,
}

impl ScmServiceManager {
    pub fn connect() -> Result<Self, ManagerError> {
        // SAFETY: null machine and database select the local active database.
        let scm = unsafe { OpenSCManagerW(ptr::null(), ptr::null(), SC_MANAGER_ALL_ACCESS) };
        if scm == 0 {
            return Err(last_error());
        }
        Ok(Self { scm })
    }
}

impl Drop for ScmServiceManager {
    fn drop(&mut self) {
        // SAFETY: handle owned by self.
        unsafe {
            CloseServiceHandle(self.scm);
        }
    }
}

impl ServiceManager for ScmServiceManager {
    fn create(&self, name: &str, display: &str, binary: &Path) -> Result<ServiceHandle, ManagerError> {
        let name = wide(name);
        let display = wide(display);
        let binary = wide(&binary.to_string_lossy());
        // SAFETY: all strings are NUL-terminated and outlive the call.
        let handle = unsafe {
            CreateServiceW(
                self.scm,
                name.as_ptr(),
                display.as_ptr(),
                SERVICE_ALL_ACCESS,
                SERVICE_KERNEL_DRIVER,
                SERVICE_DEMAND_START,
                SERVICE_ERROR_NORMAL,
                binary.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                ptr::null(),
                ptr::null(),
                ptr::null(),
            )
        };
        if handle == 0 {
            return Err(last_error());
        }
        Ok(ServiceHandle(handle as usize))
    }

    fn open(&self, name: &str) -> Result<ServiceHandle, ManagerError> {
        let name = wide(name);
        // SAFETY: `name` is NUL-terminated.
        let handle = unsafe { OpenServiceW(self.scm, name.as_ptr(), SERVICE_ALL_ACCESS) };
        if handle == 0 {
            return Err(last_error());
        }
        Ok(ServiceHandle(handle as usize))
    }

    fn start(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        // SAFETY: handle issued by this manager.
        if unsafe { StartServiceW(handle.0 as SC_HANDLE, 0, ptr::null()) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn stop(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        // SAFETY: SERVICE_STATUS is plain data.
        let mut status: SERVICE_STATUS = unsafe { std::mem::zeroed() };
        // SAFETY: handle issued by this manager; status is writable.
        if unsafe { ControlService(handle.0 as SC_HANDLE, SERVICE_CONTROL_STOP, &mut status) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn delete(&self, handle: ServiceHandle) -> Result<(), ManagerError> {
        // SAFETY: handle issued by this manager.
        if unsafe { DeleteService(handle.0 as SC_HANDLE) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn close(&self, handle: ServiceHandle) {
        // SAFETY: handle issued by this manager and closed once.
        unsafe {
            CloseServiceHandle(handle.0 as SC_HANDLE);
        }
    }
}
