//! Queue - submit 側のファサード
//!
//! # フロー（submit）
//! 1. FunctionRegistry で関数名を検証（未登録なら何も書かずに UnknownFunction）
//! 2. IdGenerator で TaskId を採番
//! 3. TaskStore::create() で PENDING レコードを保存（返る前にコミット済み）
//! 4. EventSink に TaskSubmitted を通知（best-effort）

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::status::QueueCounts;
use crate::domain::{Arguments, DomainEvent, QueueError, Result, Task, TaskId};
use crate::ports::{Clock, EventSink, IdGenerator, TaskStore};
use crate::typed::{FunctionRegistry, TypedFunction};

/// Submission and inspection surface. Cheap to clone; every clone shares the
/// same store and registry.
#[derive(Clone)]
pub struct Queue {
    registry: Arc<FunctionRegistry>,
    store: Arc<dyn TaskStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl Queue {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        store: Arc<dyn TaskStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            store,
            ids,
            clock,
            events,
        }
    }

    /// Enqueue `function` with named `arguments`.
    pub async fn submit(&self, function: &str, arguments: Arguments) -> Result<TaskId> {
        if !self.registry.contains(function) {
            return Err(QueueError::UnknownFunction(function.to_string()));
        }

        let task = Task::pending(
            self.ids.generate_task_id(),
            function,
            arguments,
            self.clock.now(),
        );
        if let Err(e) = self.store.create(&task).await {
            if matches!(e, QueueError::DuplicateId(_)) {
                tracing::error!(task_id = %task.id, error = %e, "generated task id collided");
            }
            return Err(e);
        }

        self.events.emit(&DomainEvent::TaskSubmitted {
            task_id: task.id,
            function: task.function,
            arguments: task.arguments,
        });
        Ok(task.id)
    }

    /// Like [`submit`](Self::submit), for arguments already held as a JSON
    /// value. Anything but an object is rejected.
    pub async fn submit_value(&self, function: &str, arguments: Value) -> Result<TaskId> {
        match arguments {
            Value::Object(arguments) => self.submit(function, arguments).await,
            other => Err(QueueError::InvalidArguments(format!(
                "arguments must be a JSON object, got {other}"
            ))),
        }
    }

    /// Enqueue a typed function by its `NAME`.
    pub async fn submit_typed<F>(&self, args: &F::Args) -> Result<TaskId>
    where
        F: TypedFunction,
        F::Args: Serialize + Sync,
    {
        let value =
            serde_json::to_value(args).map_err(|e| QueueError::InvalidArguments(e.to_string()))?;
        self.submit_value(F::NAME, value).await
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        self.store.get(id).await
    }

    /// Every task in submission order.
    pub async fn list_all(&self) -> Result<Vec<Task>> {
        self.store.list_all().await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        let tasks = self.store.list_all().await?;
        Ok(QueueCounts::from_tasks(&tasks))
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}
