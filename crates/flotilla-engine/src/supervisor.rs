//! Worker process supervisor.
//!
//! Owns the lifecycle of one remote worker: spawn, handshake, health-check,
//! terminate. State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Ready
//!                     |           |
//!                     v           v
//!                  Faulted <- (channel loss / timeout)
//! ```
//!
//! A transient connection failure is retried exactly once; after that the
//! worker is Faulted and it is the caller's decision whether to replace it.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use flotilla_core::{
    ConnectionState, EngineError, Task, TaskResult, WorkerHello, WorkerId, WorkerReport, WorkerSpec,
};
use flotilla_wire::{CoordinatorFrame, WorkerFrame};

use crate::config::EngineConfig;
use crate::transport::Channel;

/// Supervisor for one worker process.
pub struct WorkerSupervisor {
    id: WorkerId,
    spec: WorkerSpec,
    state: ConnectionState,
    state_since: DateTime<Utc>,
    channel: Option<Channel>,
    remote: Option<WorkerHello>,
    last_error: Option<String>,
}

impl WorkerSupervisor {
    /// Create a supervisor in the Disconnected state.
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            id: WorkerId::generate(),
            spec,
            state: ConnectionState::Disconnected,
            state_since: Utc::now(),
            channel: None,
            remote: None,
            last_error: None,
        }
    }

    /// Registry identifier of this worker.
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// The spec this worker was created from.
    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity announced by the worker process, once Ready.
    pub fn remote(&self) -> Option<&WorkerHello> {
        self.remote.as_ref()
    }

    /// Last error observed on this worker.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_since = Utc::now();
    }

    /// Spawn the worker process and perform the readiness handshake.
    ///
    /// One reconnect attempt on failure, then Faulted.
    pub async fn connect(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        self.set_state(ConnectionState::Connecting);

        let first = match self.try_connect(config).await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                info!(worker_id = %self.id, address = %self.spec.address, "worker ready");
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            worker_id = %self.id,
            address = %self.spec.address,
            error = %first,
            "connection attempt failed, retrying once"
        );

        match self.try_connect(config).await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                info!(worker_id = %self.id, address = %self.spec.address, "worker ready after retry");
                Ok(())
            }
            Err(second) => {
                self.last_error = Some(second.to_string());
                self.set_state(ConnectionState::Faulted);
                Err(EngineError::connection(&self.spec.address, second))
            }
        }
    }

    async fn try_connect(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        let mut channel = config.launcher.launch(&self.spec).await?;
        match channel
            .handshake(&self.spec.startup_commands, config.handshake_timeout)
            .await
        {
            Ok(hello) => {
                self.remote = Some(hello);
                self.channel = Some(channel);
                Ok(())
            }
            Err(e) => {
                channel.close().await;
                Err(e)
            }
        }
    }

    /// Execute one task on this worker, blocking until the reply or the
    /// task timeout.
    ///
    /// A task-level failure comes back as an `Err` outcome inside the
    /// result. An `Err` return means the channel itself is gone: the worker
    /// is marked Faulted and the caller should requeue the task.
    pub async fn execute(
        &mut self,
        task: Task,
        config: &EngineConfig,
    ) -> Result<TaskResult, EngineError> {
        let index = task.index;
        match self.exchange(task, config).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    task_index = index,
                    error = %e,
                    "channel lost while executing task"
                );
                self.fault(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn exchange(
        &mut self,
        task: Task,
        config: &EngineConfig,
    ) -> Result<TaskResult, EngineError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| EngineError::ChannelClosed("worker is not connected".to_string()))?;

        let index = task.index;
        channel.send(&CoordinatorFrame::Assign { task }).await?;

        let reply = tokio::time::timeout(config.task_timeout, channel.receive())
            .await
            .map_err(|_| {
                EngineError::ChannelClosed(format!(
                    "task {} timed out after {:?}",
                    index, config.task_timeout
                ))
            })??;

        match reply {
            WorkerFrame::Completed { result } => {
                if result.index != index {
                    return Err(EngineError::Protocol(format!(
                        "result for task {} arrived while task {} was outstanding",
                        result.index, index
                    )));
                }
                Ok(result)
            }
            WorkerFrame::Fault { message } => Err(EngineError::ChannelClosed(message)),
            other => Err(EngineError::Protocol(format!(
                "expected completion frame, got {:?}",
                other
            ))),
        }
    }

    /// Health-check the worker.
    pub async fn ping(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        let outcome = async {
            let channel = self
                .channel
                .as_mut()
                .ok_or_else(|| EngineError::ChannelClosed("worker is not connected".to_string()))?;
            channel.send(&CoordinatorFrame::Ping).await?;
            let reply = tokio::time::timeout(config.handshake_timeout, channel.receive())
                .await
                .map_err(|_| EngineError::ChannelClosed("ping timed out".to_string()))??;
            match reply {
                WorkerFrame::Pong => Ok(()),
                other => Err(EngineError::Protocol(format!(
                    "expected pong frame, got {:?}",
                    other
                ))),
            }
        }
        .await;

        if let Err(e) = &outcome {
            self.fault(e.to_string()).await;
        }
        outcome
    }

    /// Mark this worker Faulted and drop its channel.
    pub async fn mark_faulted(&mut self, reason: impl Into<String>) {
        self.fault(reason.into()).await;
    }

    async fn fault(&mut self, reason: String) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.last_error = Some(reason);
        self.set_state(ConnectionState::Faulted);
    }

    /// Ask the worker to exit, close the channel, return to Disconnected.
    pub async fn terminate(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.send(&CoordinatorFrame::Shutdown).await;
            channel.close().await;
        }
        self.remote = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Point-in-time diagnostics for this worker.
    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            worker_id: self.id.clone(),
            address: self.spec.address.clone(),
            state: self.state,
            state_since: self.state_since,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CountingLauncher;
    use crate::transport::InProcessLauncher;
    use flotilla_core::TaskBody;
    use serde_json::json;
    use std::sync::Arc;

    fn in_process_config() -> EngineConfig {
        EngineConfig::in_process()
    }

    #[tokio::test]
    async fn test_connect_execute_terminate() {
        let config = in_process_config();
        let mut sup = WorkerSupervisor::new(WorkerSpec::local("in-process"));
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        sup.connect(&config).await.unwrap();
        assert_eq!(sup.state(), ConnectionState::Ready);
        assert!(sup.remote().is_some());

        let result = sup
            .execute(Task::new(0, TaskBody::Identity, json!(9)), &config)
            .await
            .unwrap();
        assert_eq!(result.value(), Some(&json!(9)));

        sup.ping(&config).await.unwrap();

        sup.terminate().await;
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(sup.remote().is_none());
    }

    #[tokio::test]
    async fn test_connect_retries_exactly_once_then_faults() {
        let launcher = Arc::new(CountingLauncher::failing());
        let config = EngineConfig::in_process().with_launcher(launcher.clone());

        let mut sup = WorkerSupervisor::new(WorkerSpec::new("node-1", "flotilla-worker"));
        let err = sup.connect(&config).await.unwrap_err();

        assert!(matches!(err, EngineError::Connection { .. }));
        assert_eq!(sup.state(), ConnectionState::Faulted);
        assert_eq!(launcher.attempts(), 2);
        assert!(sup.last_error().is_some());
    }

    #[tokio::test]
    async fn test_connect_recovers_on_transient_failure() {
        let launcher = Arc::new(CountingLauncher::failing_once(InProcessLauncher));
        let config = EngineConfig::in_process().with_launcher(launcher.clone());

        let mut sup = WorkerSupervisor::new(WorkerSpec::local("in-process"));
        sup.connect(&config).await.unwrap();

        assert_eq!(sup.state(), ConnectionState::Ready);
        assert_eq!(launcher.attempts(), 2);
    }

    #[tokio::test]
    async fn test_startup_command_failure_faults_worker() {
        let config = in_process_config();
        let spec = WorkerSpec::local("in-process").with_startup_command("exit 7");
        let mut sup = WorkerSupervisor::new(spec);

        let err = sup.connect(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::Connection { .. }));
        assert_eq!(sup.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn test_startup_commands_run_before_ready() {
        let config = in_process_config();
        let spec = WorkerSpec::local("in-process").with_startup_command("true");
        let mut sup = WorkerSupervisor::new(spec);

        sup.connect(&config).await.unwrap();
        assert_eq!(sup.state(), ConnectionState::Ready);
    }
}
