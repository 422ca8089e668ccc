//! In-memory task store.
//!
//! Nothing survives the process. Useful for tests and for running the queue
//! without a database file.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{QueueError, Result, Task, TaskId, TaskOutcome, TaskStatus};
use crate::ports::{Clock, SystemClock, TaskStore};

/// In-memory store state.
#[derive(Default)]
struct InMemoryState {
    /// All records in insertion order (single source of truth).
    tasks: Vec<Task>,

    /// TaskId -> position in `tasks`.
    index: HashMap<TaskId, usize>,
}

impl InMemoryState {
    fn get_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        let pos = *self.index.get(&id).ok_or(QueueError::NotFound(id))?;
        Ok(&mut self.tasks[pos])
    }
}

pub struct InMemoryTaskStore {
    state: Mutex<InMemoryState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            clock,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.index.contains_key(&task.id) {
            return Err(QueueError::DuplicateId(task.id));
        }
        let pos = state.tasks.len();
        state.tasks.push(task.clone());
        state.index.insert(task.id, pos);
        Ok(())
    }

    async fn claim_next_pending(&self) -> Result<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::Pending)
            .cloned())
    }

    async fn fail_corrupt(&self, seq: i64, error: &str) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = usize::try_from(seq)
            .ok()
            .and_then(|pos| state.tasks.get_mut(pos))
            .filter(|t| t.status == TaskStatus::Pending)
            .ok_or_else(|| QueueError::Corrupt(format!("no PENDING record at position {seq}")))?;
        task.mark_terminal(TaskOutcome::failed(error), now);
        Ok(())
    }

    async fn set_running(&self, id: TaskId) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.get_mut(id)?.mark_running(now);
        Ok(())
    }

    async fn set_terminal(&self, id: TaskId, outcome: TaskOutcome) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.get_mut(id)?.mark_terminal(outcome, now);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state.index.get(&id).map(|&pos| state.tasks[pos].clone()))
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state.tasks.clone())
    }

    async fn fail_orphaned(&self, reason: &str) -> Result<Vec<TaskId>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut failed = Vec::new();
        for task in state
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Running)
        {
            task.mark_terminal(TaskOutcome::failed(reason), now);
            failed.push(task.id);
        }
        Ok(failed)
    }
}
