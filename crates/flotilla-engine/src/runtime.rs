//! Worker-side runtime.
//!
//! [`serve`] is the loop a worker process runs over its stdin/stdout: answer
//! the handshake, evaluate assigned task bodies one at a time, exit on
//! shutdown or when the coordinator goes away. Task-level failures are
//! captured into the task's result and never crash the loop.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use flotilla_core::task::NESTED_TASKS_KEY;
use flotilla_core::{
    ClusterSpec, EngineError, Task, TaskBody, TaskFailure, TaskResult, Topology, WorkerHello,
    WorkerId,
};
use flotilla_wire::{read_frame, write_frame, CoordinatorFrame, WorkerFrame};

use crate::config::EngineConfig;
use crate::topology;

/// Serve the wire protocol over the given byte streams until shutdown.
///
/// The worker binary calls this with its stdin/stdout; the in-process
/// launcher calls it with the server half of a duplex pipe.
pub async fn serve<R, W>(reader: R, writer: W, config: EngineConfig) -> Result<(), EngineError>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut writer = writer;

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let identity = WorkerHello::new(WorkerId::generate(), hostname);

    info!(worker_id = %identity.worker_id, "worker serving");

    loop {
        let frame = match read_frame::<_, CoordinatorFrame>(&mut reader).await {
            Ok(frame) => frame,
            Err(EngineError::ChannelClosed(_)) => {
                // Coordinator went away; nothing left to serve.
                debug!(worker_id = %identity.worker_id, "channel closed, exiting");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match frame {
            CoordinatorFrame::Hello { startup_commands } => {
                match run_startup_commands(&startup_commands).await {
                    Ok(()) => {
                        write_frame(
                            &mut writer,
                            &WorkerFrame::Ready {
                                worker: identity.clone(),
                            },
                        )
                        .await?;
                    }
                    Err(message) => {
                        warn!(worker_id = %identity.worker_id, error = %message, "startup failed");
                        write_frame(&mut writer, &WorkerFrame::Fault { message }).await?;
                        return Ok(());
                    }
                }
            }
            CoordinatorFrame::Assign { task } => {
                debug!(worker_id = %identity.worker_id, task_index = task.index, "task assigned");
                let result = evaluate(&task, &config).await;
                write_frame(&mut writer, &WorkerFrame::Completed { result }).await?;
            }
            CoordinatorFrame::Ping => {
                write_frame(&mut writer, &WorkerFrame::Pong).await?;
            }
            CoordinatorFrame::Shutdown => {
                info!(worker_id = %identity.worker_id, "shutdown requested");
                return Ok(());
            }
        }
    }
}

/// Evaluate one task body, capturing any failure into the result.
pub async fn evaluate(task: &Task, config: &EngineConfig) -> TaskResult {
    match run_body(task, config).await {
        Ok(value) => TaskResult::ok(task.index, value),
        Err(message) => TaskResult::failed(task.index, TaskFailure::Execution(message)),
    }
}

async fn run_body(task: &Task, config: &EngineConfig) -> Result<Value, String> {
    match &task.body {
        TaskBody::Identity => Ok(task.input.clone()),
        TaskBody::Sleep => {
            let millis = task
                .input
                .as_u64()
                .ok_or("sleep input must be an unsigned integer of milliseconds")?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(task.input.clone())
        }
        TaskBody::Command { program, args } => run_command(program, args, &task.input).await,
        TaskBody::Nested { layers } => run_nested(task, layers, config).await,
    }
}

/// Run one program, feeding the input on stdin and capturing stdout.
async fn run_command(program: &str, args: &[String], input: &Value) -> Result<Value, String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn '{}': {}", program, e))?;

    let payload = match input {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| format!("failed to write task input to '{}': {}", program, e))?;
        // Dropping stdin closes it so the program sees EOF.
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("'{}' did not run to completion: {}", program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "'{}' exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(Value::String(stdout.trim_end().to_string()))
}

/// Run the remaining topology layers over the leaf tasks carried in the
/// captured-value table. This is the payload that makes an outer worker a
/// coordinator for its own local sub-cluster.
async fn run_nested(
    task: &Task,
    layers: &[ClusterSpec],
    config: &EngineConfig,
) -> Result<Value, String> {
    let tasks_value = task
        .captures
        .get(NESTED_TASKS_KEY)
        .ok_or_else(|| format!("nested body is missing the '{}' capture", NESTED_TASKS_KEY))?;
    let tasks: Vec<Task> = serde_json::from_value(tasks_value.clone())
        .map_err(|e| format!("nested '{}' capture is not a task list: {}", NESTED_TASKS_KEY, e))?;

    let nested = Topology::new(layers.to_vec()).map_err(|e| e.to_string())?;
    let results = topology::resolve(config, &nested, tasks)
        .await
        .map_err(|e| e.to_string())?;

    serde_json::to_value(&results).map_err(|e| e.to_string())
}

async fn run_startup_commands(commands: &[String]) -> Result<(), String> {
    for command in commands {
        debug!(command = %command, "running startup command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| format!("startup command '{}' failed to spawn: {}", command, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "startup command '{}' exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            ));
        }
    }
    Ok(())
}
