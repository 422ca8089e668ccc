//! Task record: the unit of work and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::TaskId;
use super::outcome::TaskOutcome;
use super::state::TaskStatus;

/// Named arguments for a function call, in submission order.
pub type Arguments = serde_json::Map<String, Value>;

/// Task record.
///
/// Design:
/// - `id`, `function`, `arguments`, `created_at` are fixed at submission.
/// - `status`, `result`, `error`, `updated_at` change only through the
///   worker's store writes.
/// - `result` is set only for SUCCESS, `error` only for FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub function: String,
    pub arguments: Arguments,
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A freshly submitted task.
    pub fn pending(
        id: TaskId,
        function: impl Into<String>,
        arguments: Arguments,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            function: function.into(),
            arguments,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark as running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.updated_at = now;
    }

    /// Record the terminal outcome.
    pub fn mark_terminal(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) {
        self.status = outcome.status();
        let (result, error) = outcome.into_parts();
        self.result = result;
        self.error = error;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn args(v: Value) -> Arguments {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn pending_task_has_no_outcome() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let task = Task::pending(TaskId::from_ulid(Ulid::new()), "add_numbers", args(json!({"a": 2, "b": 5})), now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn terminal_write_sets_one_side() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let mut task = Task::pending(TaskId::from_ulid(Ulid::new()), "divide", Arguments::new(), t0);

        task.mark_running(t1);
        assert_eq!(task.status, TaskStatus::Running);

        task.mark_terminal(TaskOutcome::failed("division by zero"), t1);
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result.is_none());
        assert_eq!(task.error.as_deref(), Some("division by zero"));
        assert_eq!(task.created_at, t0);
        assert_eq!(task.updated_at, t1);
    }

    #[test]
    fn argument_order_is_kept() {
        let mut arguments = Arguments::new();
        arguments.insert("z".to_string(), json!(1));
        arguments.insert("a".to_string(), json!(2));

        let text = serde_json::to_string(&arguments).unwrap();
        assert_eq!(text, r#"{"z":1,"a":2}"#);
    }
}
