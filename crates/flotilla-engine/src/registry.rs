//! Cluster registry.
//!
//! Holds the supervised workers of one cluster as an ordered pool. Faulted
//! and Disconnected workers stay registered for diagnostics until they are
//! explicitly removed; they are simply excluded from scheduling snapshots.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{info, warn};

use flotilla_core::{ClusterSpec, WorkerId};

use crate::config::EngineConfig;
use crate::supervisor::WorkerSupervisor;

struct Entry {
    id: WorkerId,
    address: String,
    worker: Arc<Mutex<WorkerSupervisor>>,
}

/// Ordered registry of the workers in one cluster.
///
/// Registry mutation and snapshot reads are mutually exclusive; a snapshot
/// is a point-in-time copy, so in-flight scheduling is unaffected by
/// concurrent registry changes.
#[derive(Default)]
pub struct ClusterRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl ClusterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every worker of `cluster` concurrently and register them all,
    /// in cluster order. Workers whose connection failed are registered
    /// Faulted so the status report can show them.
    pub async fn connect(config: &EngineConfig, cluster: &ClusterSpec) -> Self {
        let mut set = JoinSet::new();
        for (position, spec) in cluster.workers.iter().cloned().enumerate() {
            let config = config.clone();
            set.spawn(async move {
                let mut worker = WorkerSupervisor::new(spec);
                if let Err(e) = worker.connect(&config).await {
                    warn!(address = %worker.spec().address, error = %e, "worker failed to connect");
                }
                (position, worker)
            });
        }

        let mut connected: Vec<Option<WorkerSupervisor>> =
            (0..cluster.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, worker)) => connected[position] = Some(worker),
                Err(e) => warn!(error = %e, "worker connection task failed"),
            }
        }

        let registry = Self::new();
        for worker in connected.into_iter().flatten() {
            registry.add(worker).await;
        }

        let ready = registry.snapshot().await.len();
        info!(
            workers = cluster.len(),
            ready, "cluster connected"
        );
        registry
    }

    /// Register a worker. Returns its registry identifier.
    pub async fn add(&self, worker: WorkerSupervisor) -> WorkerId {
        let id = worker.id().clone();
        let address = worker.spec().address.clone();
        let mut entries = self.entries.write().await;
        entries.push(Entry {
            id: id.clone(),
            address,
            worker: Arc::new(Mutex::new(worker)),
        });
        id
    }

    /// Remove a worker from the registry. Returns true if it was present.
    ///
    /// The worker is not terminated here; removal only forgets it.
    pub async fn remove(&self, id: &WorkerId) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| &entry.id != id);
        entries.len() < before
    }

    /// Point-in-time copy of the Ready workers, in registry order.
    ///
    /// A worker currently borrowed by a scheduler is mid-task and therefore
    /// not available; it is excluded just like a Faulted one.
    pub async fn snapshot(&self) -> Vec<Arc<Mutex<WorkerSupervisor>>> {
        let entries = self.entries.read().await;
        let mut ready = Vec::new();
        for entry in entries.iter() {
            if let Ok(worker) = entry.worker.try_lock() {
                if worker.state().is_ready() {
                    ready.push(Arc::clone(&entry.worker));
                }
            }
        }
        ready
    }

    /// Number of registered workers, in any state.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if no workers are registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Human-readable status of every registered worker.
    pub async fn status_report(&self) -> String {
        let entries = self.entries.read().await;
        let mut lines = Vec::with_capacity(entries.len() + 1);
        lines.push(format!("{} worker(s) registered", entries.len()));
        for entry in entries.iter() {
            match entry.worker.try_lock() {
                Ok(worker) => lines.push(format!("  {}", worker.report())),
                Err(_) => lines.push(format!("  {:<24} executing", entry.address)),
            }
        }
        lines.join("\n")
    }

    /// Terminate every registered worker.
    pub async fn terminate_all(&self) {
        let entries = self.entries.read().await;
        for entry in entries.iter() {
            let mut worker = entry.worker.lock().await;
            worker.terminate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::{ConnectionState, WorkerSpec};

    fn in_process_config() -> EngineConfig {
        EngineConfig::in_process()
    }

    fn local_cluster(n: usize) -> ClusterSpec {
        ClusterSpec::new(vec![WorkerSpec::local("in-process"); n])
    }

    #[tokio::test]
    async fn test_connect_registers_in_cluster_order() {
        let config = in_process_config();
        let registry = ClusterRegistry::connect(&config, &local_cluster(3)).await;

        assert_eq!(registry.len().await, 3);
        assert_eq!(registry.snapshot().await.len(), 3);
        registry.terminate_all().await;
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time() {
        let config = in_process_config();
        let registry = ClusterRegistry::connect(&config, &local_cluster(2)).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);

        // Mutations after the snapshot do not change the captured set.
        let mut extra = WorkerSupervisor::new(WorkerSpec::local("in-process"));
        extra.connect(&config).await.unwrap();
        let extra_id = registry.add(extra).await;
        assert_eq!(snapshot.len(), 2);

        assert!(registry.remove(&extra_id).await);
        assert!(!registry.remove(&extra_id).await);
        assert_eq!(snapshot.len(), 2);
        registry.terminate_all().await;
    }

    #[tokio::test]
    async fn test_faulted_workers_are_reported_not_scheduled() {
        let config = in_process_config();
        let registry = ClusterRegistry::connect(&config, &local_cluster(2)).await;

        let snapshot = registry.snapshot().await;
        {
            let mut worker = snapshot[0].lock().await;
            worker.mark_faulted("simulated channel loss").await;
            assert_eq!(worker.state(), ConnectionState::Faulted);
        }

        assert_eq!(registry.snapshot().await.len(), 1);
        assert_eq!(registry.len().await, 2);

        let report = registry.status_report().await;
        assert!(report.contains("faulted"));
        assert!(report.contains("simulated channel loss"));
        registry.terminate_all().await;
    }
}
