//! Transport to the privileged executor.
//!
//! The executor is reached through a single synchronous control primitive:
//! send a control code with an input buffer, receive bytes into a
//! caller-sized output buffer. Everything above this layer is written
//! against [`ExecutorTransport`] so the same code drives the real device on
//! Windows and the in-process [`LoopbackExecutor`] in tests.

mod loopback;

#[cfg(windows)]
mod device;

pub use loopback::{
    LoopbackExecutor, LoopbackFixtureBuilder, LoopbackModule, LoopbackModuleBuilder,
    RecordedCall, RoutineContext, RoutineResult, Unwind,
};

#[cfg(windows)]
pub use device::{DeviceExecutor, DriverNameResolver};

use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorCategory;
use crate::types::LoadAddress;
use crate::wire::ControlCode;

/// Failure of a single control call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The output buffer was too small. `written` bytes are valid and carry
    /// whatever size hint the control code defines.
    #[error("output buffer too small ({written} bytes written)")]
    MoreData { written: usize },

    /// Module, fixture or routine not recognized (or unloaded since discovery).
    #[error("module, fixture or routine not found")]
    NotFound,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("access to executor denied")]
    AccessDenied,

    #[error("executor I/O failed: {0}")]
    Io(String),
}

impl TransportError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MoreData { .. } => ErrorCategory::Capacity,
            Self::NotFound => ErrorCategory::NotFound,
            Self::InvalidParameter(_) => ErrorCategory::ProtocolViolation,
            Self::AccessDenied => ErrorCategory::Permission,
            Self::Io(_) => ErrorCategory::Other,
        }
    }
}

/// One synchronous request/response primitive.
///
/// Implementations block until the executor answers. Returns the number of
/// bytes written into `output` on success.
pub trait ExecutorTransport: Send + Sync {
    fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError>;
}

impl<T: ExecutorTransport + ?Sized> ExecutorTransport for Arc<T> {
    fn control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError> {
        (**self).control(code, input, output)
    }
}

/// Maps a load address to the base file name of the module loaded there.
pub trait ModuleNameResolver: Send + Sync {
    /// `None` when the address cannot be resolved.
    fn module_name(&self, address: LoadAddress) -> Option<String>;
}

impl<T: ModuleNameResolver + ?Sized> ModuleNameResolver for Arc<T> {
    fn module_name(&self, address: LoadAddress) -> Option<String> {
        (**self).module_name(address)
    }
}
