//! Module descriptors: fetching them from the executor and turning them
//! into [`Fixture`] records.

mod builder;
pub mod encode;
mod fetch;
mod model;

pub use builder::build_fixtures;
pub use fetch::{fetch_descriptor, fetch_descriptor_sized, CANARY, MAX_DESCRIPTOR_SIZE};
pub use model::{Fixture, RoutineRole, TestCase};

use thiserror::Error;

use crate::error::ErrorCategory;
use crate::executor::TransportError;
use crate::wire::ProtocolError;

#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Buffer too small; `required` is the exact descriptor size.
    #[error("descriptor needs {required} bytes")]
    Capacity { required: usize },

    #[error("fixture declares more than one {0} routine")]
    DuplicateSpecialRoutine(RoutineRole),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl DescriptorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Capacity { .. } => ErrorCategory::Capacity,
            Self::DuplicateSpecialRoutine(_) => ErrorCategory::Policy,
            Self::Transport(e) => e.category(),
            Self::Protocol(_) => ErrorCategory::ProtocolViolation,
        }
    }
}
