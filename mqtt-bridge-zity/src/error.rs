//! Error taxonomy of the synchronization engine.

use std::time::Duration;

use thiserror::Error;
use zity_bridge_framework::BridgeError;

/// Transient failure talking to the controller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Modbus link is not connected")]
    NotConnected,
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Transport error at register {address}: {message}")]
    Transport { address: u16, message: String },
    #[error("Device exception at register {address}: {code}")]
    Exception { address: u16, code: String },
    #[error("Register {address} timed out after {timeout:?}")]
    Timeout { address: u16, timeout: Duration },
    #[error("Register {address} returned {got} of {expected} values")]
    ShortRead {
        address: u16,
        expected: u16,
        got: usize,
    },
}

impl GatewayError {
    /// Whether the link should be considered down after this error.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::NotConnected | GatewayError::Connect(_) | GatewayError::Transport { .. }
        )
    }
}

/// Failure of a single command or poll item.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Device I/O failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A command payload was malformed.
    #[error("Invalid payload {payload:?} for {action}: {reason}")]
    Validation {
        action: String,
        payload: String,
        reason: String,
    },

    /// The topic addressed nothing the bridge knows about.
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// A register held a value outside its lookup table.
    #[error("Register value {value} has no {table} entry")]
    Decode { table: &'static str, value: u16 },

    /// The control plane rejected a publish.
    #[error(transparent)]
    Publish(#[from] BridgeError),
}

impl SyncError {
    pub(crate) fn validation(
        action: &str,
        payload: &str,
        reason: impl Into<String>,
    ) -> Self {
        SyncError::Validation {
            action: action.to_string(),
            payload: payload.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;
