//! Topology composer.
//!
//! Structural recursion over an ordered list of cluster layers. Depth 1
//! delegates straight to the scheduler. For deeper topologies the outer
//! scheduler's tasks are `Nested` bodies: "run the remaining layers over
//! this chunk of leaf tasks", which each outer worker resolves against the
//! sub-cluster local to it. There is no special-cased nesting logic:
//! running an inner scheduler is an ordinary task payload.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info};

use flotilla_core::task::NESTED_TASKS_KEY;
use flotilla_core::{
    ClusterSpec, EngineError, Task, TaskBody, TaskFailure, TaskOutcome, TaskResult, Topology,
};

use crate::config::EngineConfig;
use crate::registry::ClusterRegistry;
use crate::scheduler;

/// Map one task body over a sequence of inputs across a topology.
///
/// The task-submission surface: inputs are indexed in order, resolved, and
/// exactly one result per input comes back in that order. Inspecting each
/// result's success/failure tag is how callers detect partial failure.
pub async fn submit(
    config: &EngineConfig,
    topology: &Topology,
    body: TaskBody,
    inputs: Vec<Value>,
) -> Result<Vec<TaskResult>, EngineError> {
    let tasks = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| Task::new(index, body.clone(), input))
        .collect();
    resolve(config, topology, tasks).await
}

/// Resolve a batch of tasks against a topology.
///
/// Workers of the outer layer are connected for the duration of this call
/// and terminated before it returns.
pub async fn resolve(
    config: &EngineConfig,
    topology: &Topology,
    tasks: Vec<Task>,
) -> Result<Vec<TaskResult>, EngineError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    for task in &tasks {
        task.validate()?;
    }

    info!(
        depth = topology.depth(),
        outer_workers = topology.outer().len(),
        tasks = tasks.len(),
        "resolving topology"
    );

    let registry = ClusterRegistry::connect(config, topology.outer()).await;
    let outcome = match topology.inner() {
        None => scheduler::run_batch(config, tasks, &registry).await,
        Some(inner_layers) => resolve_nested(config, inner_layers, tasks, &registry).await,
    };
    registry.terminate_all().await;
    outcome
}

/// Wrap leaf tasks into per-worker `Nested` chunks and run them on the
/// outer cluster.
async fn resolve_nested(
    config: &EngineConfig,
    inner_layers: &[ClusterSpec],
    tasks: Vec<Task>,
    registry: &ClusterRegistry,
) -> Result<Vec<TaskResult>, EngineError> {
    let ready = registry.snapshot().await.len();
    if ready == 0 {
        return Err(EngineError::NoAvailableWorkers);
    }

    let chunks = chunk_tasks(&tasks, ready);
    debug!(chunks = chunks.len(), "partitioned leaf tasks");

    let outer_tasks = chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            let payload = serde_json::to_value(chunk).map_err(|e| {
                EngineError::Protocol(format!("leaf chunk {} not serializable: {}", position, e))
            })?;
            Ok(Task::new(
                position,
                TaskBody::Nested {
                    layers: inner_layers.to_vec(),
                },
                Value::Null,
            )
            .with_capture(NESTED_TASKS_KEY, payload))
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    let outer_results = scheduler::run_batch(config, outer_tasks, registry).await?;

    // Flatten chunk results back into one sequence keyed by leaf index. A
    // chunk that failed wholesale fans out to per-leaf failures so the
    // batch still produces exactly one result per task.
    let mut by_index: HashMap<usize, TaskResult> = HashMap::new();
    for (position, outer) in outer_results.into_iter().enumerate() {
        match outer.outcome {
            TaskOutcome::Ok { value } => {
                let inner: Vec<TaskResult> = serde_json::from_value(value).map_err(|e| {
                    EngineError::Protocol(format!(
                        "nested result for chunk {} unparseable: {}",
                        position, e
                    ))
                })?;
                for result in inner {
                    by_index.insert(result.index, result);
                }
            }
            TaskOutcome::Err { error } => {
                for leaf in &chunks[position] {
                    by_index.insert(leaf.index, TaskResult::failed(leaf.index, error.clone()));
                }
            }
        }
    }

    Ok(tasks
        .iter()
        .map(|task| {
            by_index.remove(&task.index).unwrap_or_else(|| {
                TaskResult::failed(
                    task.index,
                    TaskFailure::WorkerUnavailable(
                        "no result came back for this task".to_string(),
                    ),
                )
            })
        })
        .collect())
}

/// Split tasks into at most `parts` contiguous chunks, sizes differing by
/// at most one, no chunk empty.
fn chunk_tasks(tasks: &[Task], parts: usize) -> Vec<Vec<Task>> {
    let parts = parts.min(tasks.len()).max(1);
    let base = tasks.len() / parts;
    let extra = tasks.len() % parts;

    let mut chunks = Vec::with_capacity(parts);
    let mut offset = 0;
    for position in 0..parts {
        let size = base + usize::from(position < extra);
        chunks.push(tasks[offset..offset + size].to_vec());
        offset += size;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::flaky_launcher;
    use flotilla_core::WorkerSpec;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn in_process_cluster(n: usize) -> ClusterSpec {
        ClusterSpec::new(vec![WorkerSpec::local("in-process"); n])
    }

    #[test]
    fn test_chunking_covers_all_tasks_without_empties() {
        let tasks: Vec<Task> = (0..7)
            .map(|i| Task::new(i, TaskBody::Identity, json!(i)))
            .collect();
        let chunks = chunk_tasks(&tasks, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 7);
        assert!(chunks.iter().all(|c| !c.is_empty()));
        // Contiguous: concatenation restores the original order.
        let flattened: Vec<usize> = chunks.iter().flatten().map(|t| t.index).collect();
        assert_eq!(flattened, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_chunking_with_more_workers_than_tasks() {
        let tasks: Vec<Task> = (0..2)
            .map(|i| Task::new(i, TaskBody::Identity, json!(i)))
            .collect();
        let chunks = chunk_tasks(&tasks, 8);
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_flat_topology_maps_inputs_in_order() {
        let config = EngineConfig::in_process();
        let topology = Topology::flat(in_process_cluster(3));

        let inputs: Vec<Value> = (0..9).map(|i| json!(i * i)).collect();
        let results = submit(&config, &topology, TaskBody::Identity, inputs.clone())
            .await
            .unwrap();

        assert_eq!(results.len(), 9);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert_eq!(result.value(), Some(&inputs[i]));
        }
    }

    #[tokio::test]
    async fn test_empty_input_sequence_short_circuits() {
        let config = EngineConfig::in_process();
        let topology = Topology::flat(in_process_cluster(2));
        let results = submit(&config, &topology, TaskBody::Identity, vec![])
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_two_layer_topology_runs_leaves_in_parallel() {
        // 2 outer workers x 4 inner workers, 8 sleeping leaf tasks: with a
        // per-worker queue depth of 1 the whole batch is bounded by one
        // sleep, not eight.
        let config = EngineConfig::in_process();
        let topology =
            Topology::new(vec![in_process_cluster(2), in_process_cluster(4)]).unwrap();

        let sleep_millis = 300u64;
        let inputs: Vec<Value> = (0..8).map(|_| json!(sleep_millis)).collect();

        let started = Instant::now();
        let results = submit(&config, &topology, TaskBody::Sleep, inputs)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert_eq!(result.value(), Some(&json!(sleep_millis)));
        }
        assert!(
            elapsed >= Duration::from_millis(sleep_millis),
            "batch finished before a single task could: {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_millis(sleep_millis * 4),
            "leaves did not run in parallel: {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_outer_chunk_failure_fans_out_to_leaf_results() {
        // The only outer worker drops its channel on the first assignment,
        // so the whole chunk fails; every leaf still gets a tagged result.
        let launcher = flaky_launcher(0);
        let config = EngineConfig::in_process().with_launcher(launcher);
        let outer = ClusterSpec::new(vec![WorkerSpec::new("flaky", "in-process")]);
        let topology = Topology::new(vec![outer, in_process_cluster(2)]).unwrap();

        let inputs: Vec<Value> = (0..3).map(|i| json!(i)).collect();
        let results = submit(&config, &topology, TaskBody::Identity, inputs)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert!(matches!(
                result.failure(),
                Some(TaskFailure::WorkerUnavailable(_))
            ));
        }
    }
}
