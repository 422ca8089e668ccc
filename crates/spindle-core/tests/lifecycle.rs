//! End-to-end: submit through the app, run the worker against an on-disk
//! SQLite store, inspect the records.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

use spindle_core::app::ORPHAN_REASON;
use spindle_core::domain::DomainEvent;
use spindle_core::impls::{NoopEventSink, RecordingEventSink, SqliteTaskStore};
use spindle_core::ports::{EventSink, TaskStore};
use spindle_core::{
    App, AppBuilder, InvocationError, QueueConfig, StopOutcome, Task, TaskId, TaskStatus,
    TypedFunction,
};

#[derive(Serialize, Deserialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

struct AddNumbers;

#[async_trait]
impl TypedFunction for AddNumbers {
    const NAME: &'static str = "add_numbers";
    type Args = AddArgs;
    type Output = i64;

    async fn call(&self, args: AddArgs) -> Result<i64, InvocationError> {
        Ok(args.a + args.b)
    }
}

struct Divide;

#[async_trait]
impl TypedFunction for Divide {
    const NAME: &'static str = "divide";
    type Args = AddArgs;
    type Output = i64;

    async fn call(&self, args: AddArgs) -> Result<i64, InvocationError> {
        args.a
            .checked_div(args.b)
            .ok_or_else(|| InvocationError::new("division by zero"))
    }
}

#[derive(Serialize, Deserialize)]
struct SleepArgs {
    ms: u64,
}

struct Sleepy;

#[async_trait]
impl TypedFunction for Sleepy {
    const NAME: &'static str = "sleepy";
    type Args = SleepArgs;
    type Output = String;

    async fn call(&self, args: SleepArgs) -> Result<String, InvocationError> {
        tokio::time::sleep(Duration::from_millis(args.ms)).await;
        Ok("awake".to_string())
    }
}

fn config() -> QueueConfig {
    QueueConfig {
        poll_interval_ms: 10,
        ..QueueConfig::default()
    }
}

async fn app_at(path: &Path, events: Arc<dyn EventSink>) -> App {
    let store = SqliteTaskStore::open(path).await.unwrap();
    AppBuilder::new()
        .with_store(store)
        .with_event_sink(events)
        .with_config(config())
        .register_typed(AddNumbers)
        .register_typed(Divide)
        .register_typed(Sleepy)
        .expect_functions(&["add_numbers", "divide", "sleepy"])
        .build()
        .unwrap()
}

async fn wait_for_terminal(app: &App, id: TaskId) -> Task {
    for _ in 0..500 {
        let task = app.queue().get(id).await.unwrap().unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} did not finish");
}

async fn wait_for_status(app: &App, id: TaskId, status: TaskStatus) {
    for _ in 0..500 {
        if app.queue().get(id).await.unwrap().unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never reached {status}");
}

async fn wait_until_drained(app: &App) {
    for _ in 0..500 {
        if app.queue().counts().await.unwrap().is_drained() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain");
}

#[tokio::test]
async fn add_numbers_succeeds_with_result() {
    let dir = TempDir::new().unwrap();
    let app = app_at(&dir.path().join("tasks.db"), Arc::new(NoopEventSink)).await;
    let worker = app.start_worker().unwrap();

    let id = app
        .queue()
        .submit_value("add_numbers", json!({"a": 2, "b": 5}))
        .await
        .unwrap();
    let task = wait_for_terminal(&app, id).await;

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.result, Some(json!(7)));
    assert!(task.error.is_none());
    assert_eq!(
        worker.stop(Duration::from_secs(1)).await.unwrap(),
        StopOutcome::Stopped
    );
}

#[tokio::test]
async fn failure_does_not_block_later_tasks() {
    let dir = TempDir::new().unwrap();
    let app = app_at(&dir.path().join("tasks.db"), Arc::new(NoopEventSink)).await;
    let worker = app.start_worker().unwrap();

    let failing = app
        .queue()
        .submit_value("divide", json!({"a": 1, "b": 0}))
        .await
        .unwrap();
    let next = app
        .queue()
        .submit_value("add_numbers", json!({"a": 10, "b": 90}))
        .await
        .unwrap();

    let failing = wait_for_terminal(&app, failing).await;
    assert_eq!(failing.status, TaskStatus::Failed);
    assert_eq!(failing.error.as_deref(), Some("division by zero"));
    assert!(failing.result.is_none());

    let next = wait_for_terminal(&app, next).await;
    assert_eq!(next.status, TaskStatus::Success);
    assert_eq!(next.result, Some(json!(100)));

    worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn unknown_function_creates_no_record() {
    let dir = TempDir::new().unwrap();
    let app = app_at(&dir.path().join("tasks.db"), Arc::new(NoopEventSink)).await;
    app.queue()
        .submit_value("add_numbers", json!({"a": 1, "b": 1}))
        .await
        .unwrap();
    let before = app.queue().list_all().await.unwrap().len();

    let err = app
        .queue()
        .submit_value("does_not_exist", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, spindle_core::QueueError::UnknownFunction(_)));
    assert_eq!(app.queue().list_all().await.unwrap().len(), before);
}

#[tokio::test]
async fn tasks_are_claimed_in_submission_order() {
    let dir = TempDir::new().unwrap();
    let events = Arc::new(RecordingEventSink::new());
    let app = app_at(&dir.path().join("tasks.db"), events.clone()).await;

    // submit everything before the worker exists so all are PENDING together
    let mut submitted = Vec::new();
    for i in 0..10 {
        submitted.push(
            app.queue()
                .submit_value("add_numbers", json!({"a": i, "b": i}))
                .await
                .unwrap(),
        );
    }

    let worker = app.start_worker().unwrap();
    wait_until_drained(&app).await;
    worker.stop(Duration::from_secs(1)).await.unwrap();

    let claimed: Vec<TaskId> = events
        .events()
        .iter()
        .filter_map(|event| match event {
            DomainEvent::TaskClaimed { task_id, .. } => Some(*task_id),
            _ => None,
        })
        .collect();
    assert_eq!(claimed, submitted);
}

#[tokio::test]
async fn terminal_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.db");

    let before = {
        let app = app_at(&path, Arc::new(NoopEventSink)).await;
        let worker = app.start_worker().unwrap();
        app.queue()
            .submit_value("add_numbers", json!({"a": 2, "b": 5}))
            .await
            .unwrap();
        app.queue()
            .submit_value("divide", json!({"a": 2, "b": 0}))
            .await
            .unwrap();
        wait_until_drained(&app).await;
        worker.stop(Duration::from_secs(1)).await.unwrap();
        app.queue().list_all().await.unwrap()
    };

    let reopened = SqliteTaskStore::open(&path).await.unwrap();
    let after = reopened.list_all().await.unwrap();

    assert_eq!(after, before);
    assert!(after.iter().all(|task| task.status.is_terminal()));
}

#[tokio::test]
async fn stop_waits_for_in_flight_task() {
    let dir = TempDir::new().unwrap();
    let app = app_at(&dir.path().join("tasks.db"), Arc::new(NoopEventSink)).await;
    let worker = app.start_worker().unwrap();

    let slow = app
        .queue()
        .submit_value("sleepy", json!({"ms": 200}))
        .await
        .unwrap();
    let queued = app
        .queue()
        .submit_value("add_numbers", json!({"a": 1, "b": 2}))
        .await
        .unwrap();
    wait_for_status(&app, slow, TaskStatus::Running).await;

    assert_eq!(
        worker.stop(Duration::from_secs(5)).await.unwrap(),
        StopOutcome::Stopped
    );

    let slow = app.queue().get(slow).await.unwrap().unwrap();
    assert_eq!(slow.status, TaskStatus::Success);
    assert_eq!(slow.result, Some(json!("awake")));

    // the stop took effect before the next claim
    let queued = app.queue().get(queued).await.unwrap().unwrap();
    assert_eq!(queued.status, TaskStatus::Pending);
    assert_eq!(app.queue().counts().await.unwrap().running, 0);
}

#[tokio::test]
async fn timed_out_stop_still_records_the_task_and_releases_the_worker() {
    let dir = TempDir::new().unwrap();
    let app = app_at(&dir.path().join("tasks.db"), Arc::new(NoopEventSink)).await;
    let worker = app.start_worker().unwrap();

    let slow = app
        .queue()
        .submit_value("sleepy", json!({"ms": 300}))
        .await
        .unwrap();
    wait_for_status(&app, slow, TaskStatus::Running).await;

    assert_eq!(
        worker.stop(Duration::from_millis(50)).await.unwrap(),
        StopOutcome::TimedOut
    );

    // the detached loop finishes the task, then exits and frees the slot
    let task = wait_for_terminal(&app, slow).await;
    assert_eq!(task.status, TaskStatus::Success);

    let mut restarted = None;
    for _ in 0..200 {
        if let Ok(worker) = app.start_worker() {
            restarted = Some(worker);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let worker = restarted.expect("worker slot was never released");
    assert_eq!(
        worker.stop(Duration::from_secs(1)).await.unwrap(),
        StopOutcome::Stopped
    );
}

#[tokio::test]
async fn orphaned_running_task_is_failed_on_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.db");

    let orphan = {
        let app = app_at(&path, Arc::new(NoopEventSink)).await;
        app.queue()
            .submit_value("add_numbers", json!({"a": 1, "b": 1}))
            .await
            .unwrap()
    };
    // simulate a crash between set_running and set_terminal
    SqliteTaskStore::open(&path)
        .await
        .unwrap()
        .set_running(orphan)
        .await
        .unwrap();

    let events = Arc::new(RecordingEventSink::new());
    let app = app_at(&path, events.clone()).await;
    let worker = app.start_worker().unwrap();
    let task = wait_for_terminal(&app, orphan).await;
    worker.stop(Duration::from_secs(1)).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(ORPHAN_REASON));
    assert!(events
        .events()
        .contains(&DomainEvent::OrphanFailed { task_id: orphan }));
}
