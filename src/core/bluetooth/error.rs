//! Error types for adapter commands, enumeration and link setup.

use thiserror::Error;

use crate::core::bluetooth::types::ConfigurationState;

/// Every fallible adapter, orchestrator and coordinator operation returns this.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BleError {
    /// The command was issued while the adapter's state did not allow it.
    #[error("{operation} not allowed in state {state:?}: {reason}")]
    InvalidState {
        operation: &'static str,
        state: ConfigurationState,
        reason: String,
    },

    /// The command channel to the controller failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The controller firmware rejected the command.
    #[error("controller error {code:#06x}: {message}")]
    Controller { code: u32, message: String },

    /// A role action or connection attempt did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Attached hardware could not be probed, or the wrong number was found.
    #[error("enumeration error: {0}")]
    Enumeration(String),

    /// An argument was rejected before anything was sent to the controller.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The adapter was closed while the command was outstanding.
    #[error("{0} aborted: adapter closed")]
    Aborted(&'static str),
}

impl BleError {
    pub(crate) fn invalid_state(
        operation: &'static str,
        state: ConfigurationState,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            operation,
            state,
            reason: reason.into(),
        }
    }

    /// True for [`BleError::InvalidState`].
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, BleError>;
