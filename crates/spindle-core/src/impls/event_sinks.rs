//! EventSink implementations.

use std::sync::Mutex;

use crate::domain::DomainEvent;
use crate::ports::EventSink;

/// Logs every event through `tracing`.
///
/// Failures are logged at `warn`, everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        match event {
            DomainEvent::TaskSubmitted {
                task_id,
                function,
                arguments,
            } => {
                tracing::info!(%task_id, %function, arguments = %serde_json::Value::Object(arguments.clone()), "[submitted]");
            }
            DomainEvent::TaskClaimed { task_id, function } => {
                tracing::debug!(%task_id, %function, "[claimed]");
            }
            DomainEvent::TaskSucceeded {
                task_id,
                function,
                result,
            } => {
                tracing::info!(%task_id, %function, %result, "[succeeded]");
            }
            DomainEvent::TaskFailed {
                task_id,
                function,
                error,
            } => {
                tracing::warn!(%task_id, %function, %error, "[failed]");
            }
            DomainEvent::OrphanFailed { task_id } => {
                tracing::warn!(%task_id, "[orphan_failed] task was RUNNING when the worker started");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &DomainEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &DomainEvent) {
        // poisoned lock: drop the event (best-effort)
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
