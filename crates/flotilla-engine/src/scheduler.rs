//! Task scheduler.
//!
//! `run_batch` drives a work queue over the Ready workers of a cluster:
//! every idle worker is handed the next unassigned task the moment it frees
//! up, so heterogeneous task durations never stall the batch behind a slow
//! static partition. Completion order on the wire is unconstrained; results
//! are reassembled into submission order via each task's sequence index.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use flotilla_core::{BatchId, EngineError, Task, TaskFailure, TaskResult};

use crate::config::EngineConfig;
use crate::registry::ClusterRegistry;
use crate::supervisor::WorkerSupervisor;

#[derive(Clone)]
struct QueuedTask {
    /// Position within this batch's submission order.
    position: usize,
    task: Task,
    retried: bool,
}

/// Run a batch of independent tasks across the cluster's Ready workers.
///
/// - An empty batch returns an empty result sequence without contacting any
///   worker.
/// - Zero Ready workers fails with [`EngineError::NoAvailableWorkers`]
///   before any dispatch.
/// - A worker faulting mid-batch has its in-flight task requeued and retried
///   once on a different worker if any live worker remains; otherwise that
///   task's result is a [`TaskFailure::WorkerUnavailable`].
/// - Exactly one result per task comes back, in submission order.
pub async fn run_batch(
    config: &EngineConfig,
    tasks: Vec<Task>,
    registry: &ClusterRegistry,
) -> Result<Vec<TaskResult>, EngineError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    for task in &tasks {
        task.validate()?;
    }

    let workers = registry.snapshot().await;
    if workers.is_empty() {
        return Err(EngineError::NoAvailableWorkers);
    }

    let batch_id = BatchId::generate();
    info!(
        batch_id = %batch_id,
        tasks = tasks.len(),
        workers = workers.len(),
        "dispatching batch"
    );

    let indexes: Vec<usize> = tasks.iter().map(|t| t.index).collect();
    let mut pending: VecDeque<QueuedTask> = tasks
        .into_iter()
        .enumerate()
        .map(|(position, task)| QueuedTask {
            position,
            task,
            retried: false,
        })
        .collect();
    let mut idle: VecDeque<Arc<Mutex<WorkerSupervisor>>> = workers.into();
    let mut results: Vec<Option<TaskResult>> = vec![None; indexes.len()];

    type Completion = (
        Arc<Mutex<WorkerSupervisor>>,
        QueuedTask,
        Result<TaskResult, EngineError>,
    );
    let mut in_flight: JoinSet<Completion> = JoinSet::new();

    loop {
        while !pending.is_empty() && !idle.is_empty() {
            let Some(queued) = pending.pop_front() else { break };
            let Some(worker) = idle.pop_front() else {
                pending.push_front(queued);
                break;
            };

            debug!(
                batch_id = %batch_id,
                task_index = queued.task.index,
                retried = queued.retried,
                "assigning task"
            );
            let config = config.clone();
            in_flight.spawn(async move {
                let outcome = {
                    let mut guard = worker.lock().await;
                    guard.execute(queued.task.clone(), &config).await
                };
                (worker, queued, outcome)
            });
        }

        if in_flight.is_empty() {
            break;
        }

        let Some(joined) = in_flight.join_next().await else {
            break;
        };
        let (worker, queued, outcome) = match joined {
            Ok(completion) => completion,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "batch worker task failed to join");
                continue;
            }
        };

        match outcome {
            Ok(result) => {
                results[queued.position] = Some(result);
                idle.push_back(worker);
            }
            Err(e) => {
                // The supervisor already marked itself Faulted; the worker
                // does not return to the idle pool.
                let live = idle.len() + in_flight.len();
                if !queued.retried && live > 0 {
                    info!(
                        batch_id = %batch_id,
                        task_index = queued.task.index,
                        "requeueing task from faulted worker"
                    );
                    pending.push_front(QueuedTask {
                        retried: true,
                        ..queued
                    });
                } else {
                    results[queued.position] = Some(TaskResult::failed(
                        queued.task.index,
                        TaskFailure::WorkerUnavailable(e.to_string()),
                    ));
                }
            }
        }
    }

    // Tasks still queued when the last worker faulted.
    for queued in pending {
        results[queued.position] = Some(TaskResult::failed(
            queued.task.index,
            TaskFailure::WorkerUnavailable("no ready worker remained to run this task".to_string()),
        ));
    }

    let results = results
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            slot.unwrap_or_else(|| {
                TaskResult::failed(
                    indexes[position],
                    TaskFailure::WorkerUnavailable("task was never executed".to_string()),
                )
            })
        })
        .collect();

    info!(batch_id = %batch_id, "batch complete");
    Ok(results)
}
