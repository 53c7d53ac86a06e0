//! Executor device transport on Windows.
//!
//! Control codes map onto buffered device I/O controls against the
//! executor's device object; load addresses resolve through PSAPI.

use std::ffi::c_void;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND,
    ERROR_INVALID_PARAMETER, ERROR_MORE_DATA, ERROR_NOT_FOUND, ERROR_PROC_NOT_FOUND,
    GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::ProcessStatus::GetDeviceDriverBaseNameW;
use windows_sys::Win32::System::IO::DeviceIoControl;

use super::{ExecutorTransport, ModuleNameResolver, TransportError};
use crate::types::LoadAddress;
use crate::wire::ControlCode;

const FILE_DEVICE_UNKNOWN: u32 = 0x22;
const METHOD_BUFFERED: u32 = 0;
const FILE_READ_WRITE_ACCESS: u32 = 0x3;
const FUNCTION_BASE: u32 = 0x800;

fn ioctl_code(code: ControlCode) -> u32 {
    (FILE_DEVICE_UNKNOWN << 16)
        | (FILE_READ_WRITE_ACCESS << 14)
        | ((FUNCTION_BASE + code as u32) << 2)
        | METHOD_BUFFERED
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Open handle to the executor device.
pub struct DeviceExecutor {
    handle: HANDLE,
}

impl DeviceExecutor {
    /// Open `\\.\<device_name>`.
    pub fn open(device_name: &str) -> Result<Self, TransportError> {
        let path = wide(&format!(r"\\.\{device_name}"));
        // SAFETY: `path` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            // SAFETY: no preconditions.
            return Err(map_error(unsafe { GetLastError() }, 0));
        }
        tracing::debug!(device = device_name, "executor device opened");
        Ok(Self { handle })
    }
}

impl Drop for DeviceExecutor {
    fn drop(&mut self) {
        // SAFETY: handle came from CreateFileW and is closed exactly once.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

impl ExecutorTransport for DeviceExecutor {
    fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError> {
        let mut returned = 0u32;
        // SAFETY: both buffers are valid for the lengths passed and the
        // call is synchronous (no OVERLAPPED).
        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                ioctl_code(code),
                input.as_ptr() as *const c_void,
                input.len() as u32,
                output.as_mut_ptr() as *mut c_void,
                output.len() as u32,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok != 0 {
            return Ok(returned as usize);
        }
        // SAFETY: no preconditions.
        Err(map_error(unsafe { GetLastError() }, returned as usize))
    }
}

fn map_error(code: u32, written: usize) -> TransportError {
    match code {
        ERROR_MORE_DATA => TransportError::MoreData { written },
        ERROR_NOT_FOUND | ERROR_FILE_NOT_FOUND | ERROR_PROC_NOT_FOUND => TransportError::NotFound,
        ERROR_INVALID_PARAMETER => TransportError::InvalidParameter(format!("win32 error {code}")),
        ERROR_ACCESS_DENIED => TransportError::AccessDenied,
        other => TransportError::Io(format!("win32 error {other}")),
    }
}

/// Resolves driver base names of loaded kernel modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverNameResolver;

impl ModuleNameResolver for DriverNameResolver {
    fn module_name(&self, address: LoadAddress) -> Option<String> {
        let mut name = [0u16; 260];
        // SAFETY: `name` is valid for its full length; the address is only
        // used as a lookup key.
        let len = unsafe {
            GetDeviceDriverBaseNameW(address.0 as usize as *const c_void, name.as_mut_ptr(), name.len() as u32)
        };
        if len == 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&name[..len as usize]))
    }
}
