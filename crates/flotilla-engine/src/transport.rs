//! Transport channel to a worker process.
//!
//! A channel is a bidirectional frame stream over the stdio of a spawned
//! worker process. Remote addresses go through the remote shell; the
//! [`LOCAL_ADDRESS`](flotilla_core::worker::LOCAL_ADDRESS) address spawns
//! the worker command directly. Opening a channel spawns exactly one
//! process; closing it terminates that process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use flotilla_core::{EngineError, WorkerHello, WorkerSpec};
use flotilla_wire::{read_frame, write_frame, CoordinatorFrame, WorkerFrame};

use crate::config::EngineConfig;
use crate::runtime;

/// Creates the process behind a [`Channel`].
///
/// The seam between the engine and process spawning: production uses
/// [`ProcessLauncher`], single-machine fleets and tests use
/// [`InProcessLauncher`].
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn the worker described by `spec` and return its channel.
    async fn launch(&self, spec: &WorkerSpec) -> Result<Channel, EngineError>;
}

/// Bidirectional frame stream to one worker process, coordinator side.
pub struct Channel {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
}

impl Channel {
    /// Build a channel over an arbitrary byte stream pair.
    pub fn from_parts(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader) as Box<dyn AsyncRead + Send + Unpin>),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Build a channel over a spawned child's stdio, draining its stderr
    /// into the log.
    fn from_child(mut child: Child, address: &str) -> Result<Self, EngineError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::connection(address, "worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::connection(address, "worker stdout not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            let address = address.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                warn!(address = %address, stderr = %trimmed, "worker stderr");
                            }
                        }
                        Err(e) => {
                            warn!(address = %address, error = %e, "error reading worker stderr");
                            break;
                        }
                    }
                }
            });
        }

        let mut channel = Self::from_parts(stdout, stdin);
        channel.child = Some(child);
        Ok(channel)
    }

    /// Send one frame to the worker.
    pub async fn send(&mut self, frame: &CoordinatorFrame) -> Result<(), EngineError> {
        write_frame(&mut self.writer, frame).await
    }

    /// Receive the next frame from the worker.
    pub async fn receive(&mut self) -> Result<WorkerFrame, EngineError> {
        read_frame(&mut self.reader).await
    }

    /// Perform the readiness handshake: ship the startup commands, wait for
    /// the worker to report Ready within `timeout`.
    pub async fn handshake(
        &mut self,
        startup_commands: &[String],
        timeout: Duration,
    ) -> Result<WorkerHello, EngineError> {
        self.send(&CoordinatorFrame::Hello {
            startup_commands: startup_commands.to_vec(),
        })
        .await?;

        let reply = tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| {
                EngineError::ChannelClosed(format!("handshake timed out after {:?}", timeout))
            })??;

        match reply {
            WorkerFrame::Ready { worker } => {
                debug!(worker_id = %worker.worker_id, hostname = %worker.hostname, "worker ready");
                Ok(worker)
            }
            WorkerFrame::Fault { message } => Err(EngineError::ChannelClosed(message)),
            other => Err(EngineError::Protocol(format!(
                "expected ready frame, got {:?}",
                other
            ))),
        }
    }

    /// Close the channel and terminate the worker process, if any.
    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "worker process already gone");
            }
        }
    }
}

/// Spawns worker processes: directly for local specs, through `ssh` with
/// key-based authentication for remote ones.
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Channel, EngineError> {
        let mut cmd = if spec.is_local() {
            let mut cmd = Command::new(&spec.command);
            cmd.args(&spec.args);
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.arg("-o").arg("BatchMode=yes");
            if let Some(identity) = &spec.identity_file {
                cmd.arg("-i").arg(identity);
            }
            cmd.arg(spec.ssh_target());
            cmd.arg(&spec.command);
            cmd.args(&spec.args);
            cmd
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(address = %spec.address, command = %spec.command, "spawning worker process");

        let child = cmd
            .spawn()
            .map_err(|e| EngineError::connection(&spec.address, e))?;

        Channel::from_child(child, &spec.address)
    }
}

/// Runs each worker as a tokio task inside this process, connected over
/// in-memory pipes. The worker side is the same serve loop the worker
/// binary runs over its stdio.
pub struct InProcessLauncher;

#[async_trait]
impl Launcher for InProcessLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Channel, EngineError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let address = spec.address.clone();

        tokio::spawn(async move {
            if let Err(e) = runtime::serve(server_read, server_write, EngineConfig::in_process()).await
            {
                warn!(address = %address, error = %e, "in-process worker exited with error");
            }
        });

        let (client_read, client_write) = tokio::io::split(client);
        Ok(Channel::from_parts(client_read, client_write))
    }
}
