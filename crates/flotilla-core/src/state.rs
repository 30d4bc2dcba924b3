//! Connection state for a supervised worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a Worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No channel open. Initial state, and the state after `terminate`.
    #[default]
    Disconnected,
    /// Channel open, handshake in progress.
    Connecting,
    /// Handshake succeeded, worker accepts task payloads.
    Ready,
    /// Handshake or channel failed. The worker will not be retried.
    Faulted,
}

impl ConnectionState {
    /// Returns true if the worker can be assigned a task.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if the worker is permanently out of the pool.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Faulted => "faulted",
        };
        write!(f, "{}", s)
    }
}
