//! Task and result types.
//!
//! A task body is an explicit, serializable representation of the work to run:
//! a tagged union of supported operation kinds plus a captured-value table.
//! Bodies are validated when a batch is submitted, not when a worker finally
//! evaluates them.

use crate::cluster::ClusterSpec;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Captured-value key that carries the leaf tasks of a nested layer.
pub const NESTED_TASKS_KEY: &str = "tasks";

/// The operation a worker performs for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskBody {
    /// Return the input unchanged.
    Identity,
    /// Sleep for the number of milliseconds given as input, then return the input.
    Sleep,
    /// Run a program, feed the input on stdin, return captured stdout.
    Command { program: String, args: Vec<String> },
    /// Run the remaining topology layers over the leaf tasks in the
    /// captured-value table. This is how nesting stays an ordinary task.
    Nested { layers: Vec<ClusterSpec> },
}

/// One unit of work: a body plus one input value, tagged with its position
/// in the submitted batch. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Position of this task in its batch. Results are reassembled by it.
    pub index: usize,

    /// What to run.
    pub body: TaskBody,

    /// The single input value.
    pub input: Value,

    /// Captured values shipped alongside the body.
    pub captures: HashMap<String, Value>,
}

impl Task {
    /// Create a new Task.
    pub fn new(index: usize, body: TaskBody, input: Value) -> Self {
        Self {
            index,
            body,
            input,
            captures: HashMap::new(),
        }
    }

    /// Builder method to add a captured value.
    pub fn with_capture(mut self, key: impl Into<String>, value: Value) -> Self {
        self.captures.insert(key.into(), value);
        self
    }

    /// Validate the body against its input and captures.
    ///
    /// Runs at submission time so a malformed task is rejected before any
    /// dispatch, rather than surfacing as a remote execution failure.
    pub fn validate(&self) -> Result<(), EngineError> {
        match &self.body {
            TaskBody::Identity => Ok(()),
            TaskBody::Sleep => {
                if self.input.as_u64().is_none() {
                    return Err(EngineError::InvalidTask(format!(
                        "task {}: sleep input must be an unsigned integer of milliseconds",
                        self.index
                    )));
                }
                Ok(())
            }
            TaskBody::Command { program, .. } => {
                if program.is_empty() {
                    return Err(EngineError::InvalidTask(format!(
                        "task {}: command program must not be empty",
                        self.index
                    )));
                }
                Ok(())
            }
            TaskBody::Nested { layers } => {
                if layers.is_empty() {
                    return Err(EngineError::InvalidTask(format!(
                        "task {}: nested body must name at least one inner layer",
                        self.index
                    )));
                }
                let tasks = self.captures.get(NESTED_TASKS_KEY).ok_or_else(|| {
                    EngineError::InvalidTask(format!(
                        "task {}: nested body is missing the '{}' capture",
                        self.index, NESTED_TASKS_KEY
                    ))
                })?;
                serde_json::from_value::<Vec<Task>>(tasks.clone()).map_err(|e| {
                    EngineError::InvalidTask(format!(
                        "task {}: nested '{}' capture is not a task list: {}",
                        self.index, NESTED_TASKS_KEY, e
                    ))
                })?;
                Ok(())
            }
        }
    }
}

/// Terminal failure of a single task, carried inside its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TaskFailure {
    /// The task function itself failed on the worker.
    #[error("task execution failed: {0}")]
    Execution(String),

    /// The assigned worker faulted and no other Ready worker could take the task.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// Success or captured failure of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The produced value.
    Ok { value: Value },
    /// A captured failure description.
    Err { error: TaskFailure },
}

/// Result of one task, tagged with the originating task's sequence index.
///
/// For a batch of N tasks exactly N results are produced, each index
/// appearing exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Sequence index of the originating task.
    pub index: usize,

    /// Success or failure of the task.
    pub outcome: TaskOutcome,
}

impl TaskResult {
    /// A successful result.
    pub fn ok(index: usize, value: Value) -> Self {
        Self {
            index,
            outcome: TaskOutcome::Ok { value },
        }
    }

    /// A failed result.
    pub fn failed(index: usize, error: TaskFailure) -> Self {
        Self {
            index,
            outcome: TaskOutcome::Err { error },
        }
    }

    /// Returns true if the task produced a value.
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Ok { .. })
    }

    /// The produced value, if any.
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            TaskOutcome::Ok { value } => Some(value),
            TaskOutcome::Err { .. } => None,
        }
    }

    /// The captured failure, if any.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            TaskOutcome::Ok { .. } => None,
            TaskOutcome::Err { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_validates() {
        let task = Task::new(0, TaskBody::Identity, json!("x"));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_sleep_rejects_non_integer_input() {
        let task = Task::new(3, TaskBody::Sleep, json!("soon"));
        let err = task.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidTask(_)));
        assert!(err.to_string().contains("task 3"));
    }

    #[test]
    fn test_command_rejects_empty_program() {
        let body = TaskBody::Command {
            program: String::new(),
            args: vec![],
        };
        let task = Task::new(0, body, Value::Null);
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_nested_requires_tasks_capture() {
        let body = TaskBody::Nested {
            layers: vec![ClusterSpec::default()],
        };
        let task = Task::new(0, body, Value::Null);
        let err = task.validate().unwrap_err();
        assert!(err.to_string().contains("tasks"));
    }

    #[test]
    fn test_result_accessors() {
        let ok = TaskResult::ok(7, json!(42));
        assert!(ok.is_ok());
        assert_eq!(ok.value(), Some(&json!(42)));
        assert!(ok.failure().is_none());

        let failed = TaskResult::failed(7, TaskFailure::Execution("boom".into()));
        assert!(!failed.is_ok());
        assert!(failed.value().is_none());
    }

    #[test]
    fn test_body_serde_tagging() {
        let body = TaskBody::Command {
            program: "sort".into(),
            args: vec!["-n".into()],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"op\":\"command\""));
        let back: TaskBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }
}
