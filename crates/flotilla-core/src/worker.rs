//! Worker specification and identity types.

use crate::ids::WorkerId;
use crate::state::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Address used to spawn a worker process on this machine directly.
pub const LOCAL_ADDRESS: &str = "local";

/// How to reach and start one remote worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Host identifier. [`LOCAL_ADDRESS`] spawns the command directly;
    /// anything else is reached through the remote shell.
    pub address: String,

    /// Remote login user, if different from the current one.
    pub user: Option<String>,

    /// SSH identity file used as the authentication credential.
    pub identity_file: Option<PathBuf>,

    /// Commands run once on the remote process before it is reported Ready.
    pub startup_commands: Vec<String>,

    /// The worker program to start on the remote side.
    pub command: String,

    /// Arguments for the worker program.
    pub args: Vec<String>,
}

impl WorkerSpec {
    /// Create a spec that spawns `command` on `address`.
    pub fn new(address: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: None,
            identity_file: None,
            startup_commands: Vec::new(),
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Create a spec for a worker process on this machine.
    pub fn local(command: impl Into<String>) -> Self {
        Self::new(LOCAL_ADDRESS, command)
    }

    /// Builder method to set the remote login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder method to set the SSH identity file.
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Builder method to append a startup command.
    pub fn with_startup_command(mut self, command: impl Into<String>) -> Self {
        self.startup_commands.push(command.into());
        self
    }

    /// Builder method to append a worker program argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns true if the worker runs on this machine without a remote shell.
    pub fn is_local(&self) -> bool {
        self.address == LOCAL_ADDRESS
    }

    /// The `user@host` target handed to the remote shell.
    pub fn ssh_target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

/// Identity a worker announces during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHello {
    /// Unique worker identifier, generated by the worker process.
    pub worker_id: WorkerId,

    /// Hostname of the worker machine.
    pub hostname: String,

    /// Worker binary version.
    pub version: String,
}

impl WorkerHello {
    /// Create a new WorkerHello for this process.
    pub fn new(worker_id: WorkerId, hostname: impl Into<String>) -> Self {
        Self {
            worker_id,
            hostname: hostname.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Point-in-time diagnostics for one registered worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Registry identifier of the worker.
    pub worker_id: WorkerId,

    /// Host address from the spec.
    pub address: String,

    /// Current connection state.
    pub state: ConnectionState,

    /// When the worker entered its current state.
    pub state_since: DateTime<Utc>,

    /// Last error observed on this worker, if any.
    pub last_error: Option<String>,
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<24} {:<12} since {}",
            self.address,
            self.state.to_string(),
            self.state_since.to_rfc3339()
        )?;
        if let Some(err) = &self.last_error {
            write!(f, "  ({})", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_spec() {
        let spec = WorkerSpec::local("flotilla-worker");
        assert!(spec.is_local());
        assert_eq!(spec.command, "flotilla-worker");
    }

    #[test]
    fn test_ssh_target_with_user() {
        let spec = WorkerSpec::new("node-1.cluster", "flotilla-worker").with_user("ops");
        assert!(!spec.is_local());
        assert_eq!(spec.ssh_target(), "ops@node-1.cluster");
    }

    #[test]
    fn test_report_display_includes_error() {
        let report = WorkerReport {
            worker_id: WorkerId::generate(),
            address: "node-1".into(),
            state: ConnectionState::Faulted,
            state_since: Utc::now(),
            last_error: Some("handshake timed out".into()),
        };
        let line = report.to_string();
        assert!(line.contains("faulted"));
        assert!(line.contains("handshake timed out"));
    }
}
