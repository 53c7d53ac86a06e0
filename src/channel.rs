//! The single call that crosses into the executor.
//!
//! `call_routine` is stateless: the request names the routine by module
//! address, fixture key and routine key, and any context the executor needs
//! across calls travels in the continuation token. The response buffer has
//! a fixed size; the executor drops whole events that do not fit and flags
//! the response as truncated.

use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorCategory;
use crate::events::{decode_events, ExecutionEvent};
use crate::executor::{ExecutorTransport, TransportError};
use crate::types::{ContinuationToken, Dispositions, FixtureKey, LoadAddress, RoutineKey};
use crate::wire::{
    CallRequest, CallResponseHeader, ControlCode, ProtocolError, WireView,
    CALL_RESPONSE_HEADER_SIZE,
};

/// Default response buffer size.
pub const DEFAULT_RESPONSE_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Module, fixture or routine unknown to the executor. Only worth
    /// retrying after re-discovering the module.
    #[error("routine not found")]
    NotFound,

    #[error("invalid call: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChannelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound => ErrorCategory::NotFound,
            Self::InvalidParameter(_) | Self::Protocol(_) => ErrorCategory::ProtocolViolation,
            Self::Transport(e) => e.category(),
        }
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotFound => Self::NotFound,
            TransportError::InvalidParameter(msg) => Self::InvalidParameter(msg),
            other => Self::Transport(other),
        }
    }
}

/// How a routine call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Ran to completion, run continues.
    Completed,
    /// Cut short by a failure; the run may continue.
    CutShort,
    /// The run must be aborted.
    Abort,
}

/// Result of one routine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineCall {
    pub ran_to_completion: bool,
    pub abort_requested: bool,
    pub token: ContinuationToken,
    pub events: Vec<ExecutionEvent>,
    /// At least one event was dropped for lack of space.
    pub truncated: bool,
}

impl RoutineCall {
    pub fn outcome(&self) -> CallOutcome {
        if self.abort_requested {
            CallOutcome::Abort
        } else if self.ran_to_completion {
            CallOutcome::Completed
        } else {
            CallOutcome::CutShort
        }
    }
}

/// Invocation channel bound to one transport.
#[derive(Clone)]
pub struct RoutineChannel {
    transport: Arc<dyn ExecutorTransport>,
    buffer_size: usize,
}

impl RoutineChannel {
    /// Buffers smaller than the response header are raised to it.
    pub fn new(transport: Arc<dyn ExecutorTransport>, buffer_size: usize) -> Self {
        Self { transport, buffer_size: buffer_size.max(CALL_RESPONSE_HEADER_SIZE) }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn transport(&self) -> &Arc<dyn ExecutorTransport> {
        &self.transport
    }

    pub fn call_routine(
        &self,
        address: LoadAddress,
        fixture_key: FixtureKey,
        routine_key: RoutineKey,
        dispositions: Dispositions,
        token: ContinuationToken,
    ) -> Result<RoutineCall, ChannelError> {
        let request = CallRequest { address, fixture_key, routine_key, dispositions, token };
        let mut buffer = vec![0u8; self.buffer_size];

        let written = self
            .transport
            .control(ControlCode::CallRoutine, &request.encode(), &mut buffer)?;
        let response = WireView::new(buffer.get(..written).ok_or(ProtocolError::Truncated {
            needed: written,
            available: buffer.len(),
        })?);

        let header = CallResponseHeader::read_from(&response)?;
        let events = decode_events(&response, &header)?;

        if header.truncated {
            tracing::debug!(
                %address,
                fixture = fixture_key.0,
                routine = routine_key.0,
                kept = events.len(),
                "call response truncated"
            );
        }

        Ok(RoutineCall {
            ran_to_completion: header.ran_to_completion,
            abort_requested: header.abort_run,
            token: header.token,
            events,
            truncated: header.truncated,
        })
    }
}
