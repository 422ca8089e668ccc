//! Events - 診断用のドメインイベント
//!
//! EventSink へ送られる best-effort の通知です。耐久性の契約には含まれません。

use serde_json::Value;

use super::ids::TaskId;
use super::task::Arguments;

/// DomainEvent はキューで発生したイベント
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TaskSubmitted {
        task_id: TaskId,
        function: String,
        arguments: Arguments,
    },
    TaskClaimed {
        task_id: TaskId,
        function: String,
    },
    TaskSucceeded {
        task_id: TaskId,
        function: String,
        result: Value,
    },
    TaskFailed {
        task_id: TaskId,
        function: String,
        error: String,
    },
    /// A RUNNING task left over from a previous process was marked FAILED.
    OrphanFailed { task_id: TaskId },
}

impl DomainEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            DomainEvent::TaskSubmitted { task_id, .. }
            | DomainEvent::TaskClaimed { task_id, .. }
            | DomainEvent::TaskSucceeded { task_id, .. }
            | DomainEvent::TaskFailed { task_id, .. }
            | DomainEvent::OrphanFailed { task_id } => *task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskSubmitted { .. } => "submitted",
            DomainEvent::TaskClaimed { .. } => "claimed",
            DomainEvent::TaskSucceeded { .. } => "succeeded",
            DomainEvent::TaskFailed { .. } => "failed",
            DomainEvent::OrphanFailed { .. } => "orphan_failed",
        }
    }
}
