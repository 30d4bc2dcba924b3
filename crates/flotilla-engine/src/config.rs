//! Engine configuration.
//!
//! One explicit object threaded through `resolve`/`run_batch` calls. There
//! is no process-wide execution-strategy state: concurrent callers with
//! different configurations cannot interfere with each other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::{InProcessLauncher, Launcher, ProcessLauncher};

/// Engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// How long a worker may take to answer the readiness handshake,
    /// including its startup commands.
    pub handshake_timeout: Duration,

    /// How long a single task may run before its worker is treated as lost.
    pub task_timeout: Duration,

    /// How worker processes are created.
    pub launcher: Arc<dyn Launcher>,
}

impl EngineConfig {
    /// Configuration that spawns workers as processes (ssh for remote
    /// addresses, direct spawn for local ones).
    pub fn new() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            task_timeout: Duration::from_secs(60),
            launcher: Arc::new(ProcessLauncher),
        }
    }

    /// Configuration whose workers are tokio tasks inside this process,
    /// connected over in-memory pipes. Useful for a single-machine fleet
    /// and for tests.
    pub fn in_process() -> Self {
        Self::new().with_launcher(Arc::new(InProcessLauncher))
    }

    /// Builder method to set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Builder method to set the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Builder method to set the launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}
