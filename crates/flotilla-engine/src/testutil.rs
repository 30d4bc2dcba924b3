//! Shared helpers for engine tests: counting/faulting launchers and a
//! deliberately unreliable worker loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{BufReader, DuplexStream};

use flotilla_core::{
    ClusterSpec, EngineError, TaskResult, WorkerHello, WorkerId, WorkerSpec,
};
use flotilla_wire::{read_frame, write_frame, CoordinatorFrame, WorkerFrame};

use crate::config::EngineConfig;
use crate::registry::ClusterRegistry;
use crate::transport::{Channel, InProcessLauncher, Launcher};

/// Launcher that counts attempts and fails some of them.
pub(crate) struct CountingLauncher {
    attempts: AtomicUsize,
    inner: Option<Box<dyn Launcher>>,
}

impl CountingLauncher {
    /// Fail every launch attempt.
    pub fn failing() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            inner: None,
        }
    }

    /// Fail the first launch attempt, delegate the rest to `inner`.
    pub fn failing_once(inner: impl Launcher + 'static) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            inner: Some(Box::new(inner)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for CountingLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Channel, EngineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.inner {
            Some(inner) if attempt > 0 => inner.launch(spec).await,
            _ => Err(EngineError::connection(&spec.address, "connection refused")),
        }
    }
}

/// Launcher whose workers at address `"flaky"` complete a fixed number of
/// tasks and then drop their channel mid-assignment. All other addresses
/// get a normal in-process worker.
struct FlakyLauncher {
    complete_before_fault: usize,
}

#[async_trait]
impl Launcher for FlakyLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Channel, EngineError> {
        if spec.address != "flaky" {
            return InProcessLauncher.launch(spec).await;
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        let complete_before_fault = self.complete_before_fault;
        tokio::spawn(async move {
            serve_flaky(server, complete_before_fault).await;
        });
        let (read, write) = tokio::io::split(client);
        Ok(Channel::from_parts(read, write))
    }
}

pub(crate) fn flaky_launcher(complete_before_fault: usize) -> Arc<dyn Launcher> {
    Arc::new(FlakyLauncher {
        complete_before_fault,
    })
}

/// A worker that handshakes normally, echoes inputs for a while, then
/// silently drops the connection with a task outstanding.
async fn serve_flaky(stream: DuplexStream, complete_before_fault: usize) {
    let (read, write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut writer = write;
    let identity = WorkerHello::new(WorkerId::generate(), "flaky");

    let mut completed = 0;
    loop {
        let frame = match read_frame::<_, CoordinatorFrame>(&mut reader).await {
            Ok(frame) => frame,
            Err(_) => return,
        };
        match frame {
            CoordinatorFrame::Hello { .. } => {
                let ready = WorkerFrame::Ready {
                    worker: identity.clone(),
                };
                if write_frame(&mut writer, &ready).await.is_err() {
                    return;
                }
            }
            CoordinatorFrame::Assign { task } => {
                if completed >= complete_before_fault {
                    return;
                }
                completed += 1;
                let completed_frame = WorkerFrame::Completed {
                    result: TaskResult::ok(task.index, task.input),
                };
                if write_frame(&mut writer, &completed_frame).await.is_err() {
                    return;
                }
            }
            CoordinatorFrame::Ping => {
                if write_frame(&mut writer, &WorkerFrame::Pong).await.is_err() {
                    return;
                }
            }
            CoordinatorFrame::Shutdown => return,
        }
    }
}

/// A registry of `n` connected in-process workers.
pub(crate) async fn in_process_registry(config: &EngineConfig, n: usize) -> ClusterRegistry {
    let cluster = ClusterSpec::new(vec![WorkerSpec::local("in-process"); n]);
    ClusterRegistry::connect(config, &cluster).await
}
