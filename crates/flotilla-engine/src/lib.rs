//! Flotilla execution engine.
//!
//! The engine turns a [`flotilla_core::Topology`] and a batch of tasks into
//! an ordered sequence of results:
//!
//! - [`transport`] opens a byte-stream channel to a remote-shell-spawned
//!   worker process and performs the readiness handshake.
//! - [`supervisor`] owns the lifecycle of one worker behind that channel.
//! - [`registry`] holds the supervised workers of one cluster as a flat pool.
//! - [`scheduler`] runs a batch across the pool with a work queue and
//!   immediate reassignment, reassembling results in submission order.
//! - [`topology`] nests schedulers, so an outer layer's task is "run the
//!   inner layers on the cluster local to one worker".
//! - [`runtime`] is the worker side: the serve loop a worker process runs
//!   over its stdio, and the task-body evaluator.

pub mod config;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod supervisor;
pub mod topology;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::EngineConfig;
pub use registry::ClusterRegistry;
pub use scheduler::run_batch;
pub use supervisor::WorkerSupervisor;
pub use topology::{resolve, submit};
pub use transport::{Channel, InProcessLauncher, Launcher, ProcessLauncher};
