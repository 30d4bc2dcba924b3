//! Engine-level errors.
//!
//! Per-task failures are not here: they are captured in [`crate::task::TaskFailure`]
//! and returned inside the task's result, so a single bad task never aborts a batch.

use thiserror::Error;

/// Errors that abort an operation at the worker or batch level.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Initial connection or handshake to a worker never succeeded.
    #[error("connection to '{address}' failed: {reason}")]
    Connection { address: String, reason: String },

    /// Mid-session transport loss on an established channel.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A batch was submitted against a cluster with zero Ready workers.
    #[error("no available workers")]
    NoAvailableWorkers,

    /// A task body failed submission-time validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// A topology must have at least one cluster layer.
    #[error("topology must contain at least one cluster layer")]
    EmptyTopology,

    /// The remote peer sent a frame that does not fit the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Build a [`EngineError::Connection`] for the given address.
    pub fn connection(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error marks the worker's channel as unusable.
    pub fn is_channel_loss(&self) -> bool {
        matches!(self, Self::ChannelClosed(_) | Self::Connection { .. })
    }
}
