//! Frames exchanged between the coordinator and a worker process.

use flotilla_core::{Task, TaskResult, WorkerHello};
use serde::{Deserialize, Serialize};

/// Frames sent by the coordinator to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorFrame {
    /// Handshake opener. The worker runs the startup commands and answers
    /// with [`WorkerFrame::Ready`] before any task is assigned.
    Hello { startup_commands: Vec<String> },

    /// Assign one task. The worker holds at most one outstanding task.
    Assign { task: Task },

    /// Health-check. The worker answers with [`WorkerFrame::Pong`].
    Ping,

    /// Ask the worker to exit its serve loop.
    Shutdown,
}

/// Frames sent by a worker to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// Handshake reply: startup commands ran, the worker accepts payloads.
    Ready { worker: WorkerHello },

    /// Reply to a [`CoordinatorFrame::Assign`]. Task-level failures are
    /// carried inside the result, not as a `Fault`.
    Completed { result: TaskResult },

    /// Reply to a [`CoordinatorFrame::Ping`].
    Pong,

    /// The worker cannot continue (startup command failed, protocol
    /// violation). The coordinator treats the channel as lost.
    Fault { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::{TaskBody, WorkerId};
    use serde_json::json;

    #[test]
    fn test_hello_frame_tagging() {
        let frame = CoordinatorFrame::Hello {
            startup_commands: vec!["ulimit -n 4096".into()],
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"hello\""));
        assert!(json.contains("ulimit"));
    }

    #[test]
    fn test_assign_round_trip() {
        let frame = CoordinatorFrame::Assign {
            task: Task::new(4, TaskBody::Identity, json!({"k": 1})),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: CoordinatorFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_ready_frame_carries_identity() {
        let frame = WorkerFrame::Ready {
            worker: WorkerHello::new(WorkerId::new("w-1"), "node-1"),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"ready\""));
        assert!(json.contains("node-1"));
    }
}
