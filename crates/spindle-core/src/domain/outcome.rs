//! Outcome model: how one invocation ended.
//!
//! The terminal write to the store takes a [`TaskOutcome`], so a terminal
//! record carries either a result or an error, never both and never neither.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::TaskStatus;

/// Error returned by a registered function.
///
/// Carries only a human-readable description; it is recorded on the task
/// and never propagated past the worker loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InvocationError {
    message: String,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    /// Serialized return value.
    Success(Value),

    /// Failure description.
    Failed(String),
}

impl TaskOutcome {
    pub fn success(value: Value) -> Self {
        TaskOutcome::Success(value)
    }

    /// Build a failure outcome. An empty description is replaced so that a
    /// FAILED record always has a non-empty `error`.
    pub fn failed(description: impl Into<String>) -> Self {
        let description = description.into();
        if description.trim().is_empty() {
            TaskOutcome::Failed("function failed without a description".to_string())
        } else {
            TaskOutcome::Failed(description)
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Success(_) => TaskStatus::Success,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }

    /// Split into the `(result, error)` column pair.
    pub fn into_parts(self) -> (Option<Value>, Option<String>) {
        match self {
            TaskOutcome::Success(value) => (Some(value), None),
            TaskOutcome::Failed(error) => (None, Some(error)),
        }
    }
}

impl From<Result<Value, InvocationError>> for TaskOutcome {
    fn from(result: Result<Value, InvocationError>) -> Self {
        match result {
            Ok(value) => TaskOutcome::success(value),
            Err(err) => TaskOutcome::failed(err.message),
        }
    }
}
