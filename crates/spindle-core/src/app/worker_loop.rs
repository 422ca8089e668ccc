//! WorkerLoop - タスク実行ループ
//!
//! # フロー（1 イテレーション）
//! 1. claim_next_pending() で最古の PENDING を取得（なければ poll_interval 待つ）
//! 2. set_running() で所有を確定
//! 3. registry で関数を解決して実行（panic も含めて FAILED に変換）
//! 4. set_terminal() で結果を保存
//! 5. EventSink に TaskSucceeded / TaskFailed を通知
//!
//! # 停止
//! - `watch::Sender` に true を送る（または drop する）と、次のイテレーション先頭で抜ける
//! - 待機中（idle sleep）の停止は select! で即座に拾う
//! - 実行中の関数は中断しない

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::QueueConfig;
use crate::domain::{DomainEvent, QueueError, Result, Task, TaskId, TaskOutcome, TaskStatus};
use crate::ports::{EventSink, TaskStore};
use crate::typed::FunctionRegistry;

/// Error recorded on tasks found RUNNING when a worker starts.
pub const ORPHAN_REASON: &str = "interrupted: worker stopped before completion";

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// No PENDING task.
    Idle,
    /// One task was claimed, executed and recorded.
    Processed { task_id: TaskId, status: TaskStatus },
    /// The oldest PENDING record could not be decoded and was marked FAILED.
    Undecodable { seq: i64 },
}

/// The single consumer of the task store.
///
/// The store's claim is two calls (`claim_next_pending` then `set_running`),
/// so at most one `WorkerLoop` may run against a store at a time.
pub struct WorkerLoop {
    store: Arc<dyn TaskStore>,
    registry: Arc<FunctionRegistry>,
    events: Arc<dyn EventSink>,
    config: QueueConfig,
}

impl WorkerLoop {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<FunctionRegistry>,
        events: Arc<dyn EventSink>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            config,
        }
    }

    /// Mark tasks left RUNNING by a previous process as FAILED.
    pub async fn recover_orphans(&self) -> Result<Vec<TaskId>> {
        let ids = self
            .with_store_retry("fail_orphaned", || self.store.fail_orphaned(ORPHAN_REASON))
            .await?;
        for task_id in &ids {
            self.events.emit(&DomainEvent::OrphanFailed { task_id: *task_id });
        }
        if !ids.is_empty() {
            tracing::warn!(count = ids.len(), "marked orphaned RUNNING tasks as FAILED");
        }
        Ok(ids)
    }

    /// Claim, execute and record at most one task.
    ///
    /// Only store failures are returned as errors; a failing function ends
    /// up as a FAILED record and `Ok(Iteration::Processed { .. })`, an
    /// undecodable record as `Ok(Iteration::Undecodable { .. })`.
    pub async fn run_once(&self) -> Result<Iteration> {
        let claimed = match self
            .with_store_retry("claim_next_pending", || self.store.claim_next_pending())
            .await
        {
            Ok(claimed) => claimed,
            Err(QueueError::CorruptPending { seq, message }) => {
                tracing::error!(seq, error = %message, "pending task could not be decoded, marking it FAILED");
                let error = format!("corrupt record: {message}");
                self.with_store_retry("fail_corrupt", || self.store.fail_corrupt(seq, &error))
                    .await?;
                return Ok(Iteration::Undecodable { seq });
            }
            Err(e) => return Err(e),
        };
        let Some(task) = claimed else {
            return Ok(Iteration::Idle);
        };

        let task_id = task.id;
        self.with_store_retry("set_running", || self.store.set_running(task_id))
            .await?;
        self.events.emit(&DomainEvent::TaskClaimed {
            task_id,
            function: task.function.clone(),
        });

        let outcome = self.invoke(&task).await;
        let status = outcome.status();

        self.with_store_retry("set_terminal", || {
            self.store.set_terminal(task_id, outcome.clone())
        })
        .await
        .map_err(|e| {
            tracing::error!(%task_id, function = %task.function, error = %e, "could not record task outcome");
            match e {
                QueueError::StoreUnavailable(message) => QueueError::StoreUnavailable(format!(
                    "outcome of task {task_id} not recorded: {message}"
                )),
                other => other,
            }
        })?;

        let event = match outcome {
            TaskOutcome::Success(result) => DomainEvent::TaskSucceeded {
                task_id,
                function: task.function,
                result,
            },
            TaskOutcome::Failed(error) => DomainEvent::TaskFailed {
                task_id,
                function: task.function,
                error,
            },
        };
        self.events.emit(&event);

        Ok(Iteration::Processed { task_id, status })
    }

    /// Run until the stop signal is set or its sender is dropped.
    ///
    /// Returns early with the error if the store stays unavailable after
    /// retries.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        if self.config.fail_orphaned_on_start {
            self.recover_orphans().await?;
        }
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            functions = ?self.registry.names(),
            "worker loop started"
        );

        loop {
            // stop requested, or every sender dropped
            let stop_requested = *shutdown_rx.borrow();
            if stop_requested || shutdown_rx.has_changed().is_err() {
                break;
            }

            let iteration = match self.run_once().await {
                Ok(iteration) => iteration,
                Err(e) => {
                    tracing::error!(error = %e, "worker loop halted");
                    return Err(e);
                }
            };

            if iteration == Iteration::Idle {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender dropped
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }

        tracing::info!("worker loop stopped");
        Ok(())
    }

    /// Execute the task's function. Never fails: every problem becomes a
    /// FAILED outcome.
    async fn invoke(&self, task: &Task) -> TaskOutcome {
        let function = match self.registry.resolve(&task.function) {
            Ok(function) => function,
            Err(e) => return TaskOutcome::failed(e.to_string()),
        };

        let arguments = task.arguments.clone();
        let call = tokio::spawn(async move { function.call(arguments).await });
        match call.await {
            Ok(result) => TaskOutcome::from(result),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                TaskOutcome::failed(format!("function panicked: {message}"))
            }
            Err(e) => TaskOutcome::failed(format!("function was cancelled: {e}")),
        }
    }

    /// Call the store, retrying `StoreUnavailable` with backoff.
    async fn with_store_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.config.store_retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_store_failure() && attempts < policy.max_attempts() => {
                    let delay = policy.next_delay(attempts);
                    tracing::warn!(
                        op,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "task store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// How `WorkerHandle::stop` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop exited.
    Stopped,
    /// The loop was still inside an invocation when the timeout elapsed.
    /// It keeps running detached and exits after that task is recorded.
    TimedOut,
}

/// Marks an `App` as having a live worker. Cleared on drop.
pub(crate) struct ActiveWorker(Arc<AtomicBool>);

impl ActiveWorker {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| QueueError::WorkerAlreadyRunning)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a spawned worker loop.
/// - `request_stop()` か handle の drop でループが止まる
/// - `stop()` で停止を待てる（timeout 付き）
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Spawn `worker` on the current tokio runtime.
    pub fn spawn(worker: WorkerLoop) -> Self {
        Self::spawn_inner(worker, None)
    }

    pub(crate) fn spawn_exclusive(worker: WorkerLoop, active: ActiveWorker) -> Self {
        Self::spawn_inner(worker, Some(active))
    }

    fn spawn_inner(worker: WorkerLoop, active: Option<ActiveWorker>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let _active = active;
            worker.run(shutdown_rx).await
        });
        Self { shutdown_tx, join }
    }

    /// Ask the loop to exit after its current iteration.
    pub fn request_stop(&self) {
        // ignore send error: the loop may already have exited
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether the loop has exited (stopped or halted by a store failure).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request stop and wait up to `timeout` for the loop to exit.
    ///
    /// An in-flight invocation is never interrupted; its outcome is recorded
    /// before the loop exits.
    pub async fn stop(mut self, timeout: Duration) -> Result<StopOutcome> {
        self.request_stop();
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(result)) => result.map(|()| StopOutcome::Stopped),
            Ok(Err(e)) => Err(QueueError::WorkerCrashed(e.to_string())),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "worker did not stop in time");
                Ok(StopOutcome::TimedOut)
            }
        }
    }
}
