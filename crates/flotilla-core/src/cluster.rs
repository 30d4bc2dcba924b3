//! Cluster and topology specifications.

use crate::error::EngineError;
use crate::worker::WorkerSpec;
use serde::{Deserialize, Serialize};

/// An ordered collection of workers addressable as one scheduling unit.
///
/// Ordering defines round-robin assignment priority; it is not a
/// correctness requirement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Workers in assignment-priority order.
    pub workers: Vec<WorkerSpec>,
}

impl ClusterSpec {
    /// Create a cluster from a list of worker specs.
    pub fn new(workers: Vec<WorkerSpec>) -> Self {
        Self { workers }
    }

    /// Builder method to append a worker.
    pub fn with_worker(mut self, worker: WorkerSpec) -> Self {
        self.workers.push(worker);
        self
    }

    /// Number of workers in this cluster.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns true if the cluster has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// An ordered list of cluster layers, outer-to-inner.
///
/// Only the innermost layer executes user task bodies directly; outer layers
/// execute "run the inner layers" as their task body.
///
/// Serializes as a plain array of layers, so the depth invariant also holds
/// for topologies read from configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ClusterSpec>", into = "Vec<ClusterSpec>")]
pub struct Topology {
    layers: Vec<ClusterSpec>,
}

impl TryFrom<Vec<ClusterSpec>> for Topology {
    type Error = EngineError;

    fn try_from(layers: Vec<ClusterSpec>) -> Result<Self, Self::Error> {
        Self::new(layers)
    }
}

impl From<Topology> for Vec<ClusterSpec> {
    fn from(topology: Topology) -> Self {
        topology.layers
    }
}

impl Topology {
    /// Create a topology. Fails if no layers are given.
    pub fn new(layers: Vec<ClusterSpec>) -> Result<Self, EngineError> {
        if layers.is_empty() {
            return Err(EngineError::EmptyTopology);
        }
        Ok(Self { layers })
    }

    /// A single-layer topology over one cluster.
    pub fn flat(cluster: ClusterSpec) -> Self {
        Self {
            layers: vec![cluster],
        }
    }

    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// The outermost cluster layer.
    pub fn outer(&self) -> &ClusterSpec {
        // Invariant: layers is non-empty, enforced by the constructors.
        &self.layers[0]
    }

    /// The layers below the outermost one, if any.
    pub fn inner(&self) -> Option<&[ClusterSpec]> {
        if self.layers.len() > 1 {
            Some(&self.layers[1..])
        } else {
            None
        }
    }

    /// All layers, outer-to-inner.
    pub fn layers(&self) -> &[ClusterSpec] {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(addr: &str) -> WorkerSpec {
        WorkerSpec::new(addr, "flotilla-worker")
    }

    #[test]
    fn test_topology_requires_a_layer() {
        assert!(matches!(
            Topology::new(vec![]),
            Err(EngineError::EmptyTopology)
        ));
    }

    #[test]
    fn test_flat_topology() {
        let topo = Topology::flat(ClusterSpec::new(vec![worker("a"), worker("b")]));
        assert_eq!(topo.depth(), 1);
        assert_eq!(topo.outer().len(), 2);
        assert!(topo.inner().is_none());
    }

    #[test]
    fn test_topology_deserializes_from_layer_array() {
        let json = r#"[{"workers": []}, {"workers": []}]"#;
        let topo: Topology = serde_json::from_str(json).unwrap();
        assert_eq!(topo.depth(), 2);

        let empty: Result<Topology, _> = serde_json::from_str("[]");
        assert!(empty.is_err());
    }

    #[test]
    fn test_nested_layers() {
        let outer = ClusterSpec::new(vec![worker("m1"), worker("m2")]);
        let inner = ClusterSpec::new(vec![worker("local"); 4]);
        let topo = Topology::new(vec![outer, inner]).unwrap();
        assert_eq!(topo.depth(), 2);
        let rest = topo.inner().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].len(), 4);
    }
}
