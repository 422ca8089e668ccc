//! SQLite-backed task store (durable).
//!
//! One connection behind an async mutex; every call runs on the blocking
//! pool. Each write is its own committed statement (or transaction), so a
//! reopened database reflects the last committed write for every record.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tokio::sync::Mutex;

use crate::domain::{Arguments, QueueError, Result, Task, TaskId, TaskOutcome, TaskStatus};
use crate::ports::{Clock, SystemClock, TaskStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    function TEXT NOT NULL,
    arguments TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'RUNNING', 'SUCCESS', 'FAILED')),
    result TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status_seq ON tasks(status, seq);
"#;

/// How long `open` waits for another holder of the file lock.
const LOCK_WAIT: Duration = Duration::from_millis(200);

const SELECT_COLUMNS: &str =
    "SELECT seq, id, function, arguments, status, result, error, created_at, updated_at FROM tasks";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteTaskStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(|e| {
                QueueError::StoreUnavailable(format!("failed to open {}: {e}", path.display()))
            })?;
            Self::init(&conn).map_err(|e| {
                if is_locked(&e) {
                    QueueError::StoreUnavailable(format!(
                        "{} is already open in another process",
                        path.display()
                    ))
                } else {
                    QueueError::StoreUnavailable(format!(
                        "failed to initialize {}: {e}",
                        path.display()
                    ))
                }
            })?;
            tracing::debug!(path = %path.display(), "opened task store");
            Ok::<_, QueueError>(conn)
        })
        .await
        .map_err(|e| QueueError::StoreUnavailable(format!("task join error: {e}")))??;

        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database (gone when the store is dropped).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(&conn).map_err(store_err)?;
        Ok(Self::from_connection(conn))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Apply pragmas and schema, then take the file's write lock.
    ///
    /// In exclusive locking mode the lock is held until the connection
    /// closes, so one database file has at most one store (and one worker)
    /// across processes.
    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(LOCK_WAIT)?;
        let locking_mode: String =
            conn.query_row("PRAGMA locking_mode = EXCLUSIVE", [], |row| row.get(0))?;
        // in-memory databases answer "memory" here
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")?;
        tracing::trace!(%locking_mode, %journal_mode, "task store pragmas applied");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut *conn)
        })
        .await
        .map_err(|e| QueueError::StoreUnavailable(format!("task join error: {e}")))?
    }

    fn now_text(&self) -> String {
        timestamp_text(self.clock.now())
    }
}

fn store_err(e: rusqlite::Error) -> QueueError {
    QueueError::StoreUnavailable(e.to_string())
}

fn timestamp_text(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

/// Raw column values, decoded outside of rusqlite so that a bad row is
/// reported as `Corrupt` rather than as a storage failure.
struct TaskRow {
    seq: i64,
    id: String,
    function: String,
    arguments: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            function: row.get(2)?,
            arguments: row.get(3)?,
            status: row.get(4)?,
            result: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            QueueError::Corrupt(format!("task {}: {what}: {e}", self.id))
        };

        let id: TaskId = self.id.parse().map_err(|e| corrupt("id", &e))?;
        let arguments: Arguments =
            serde_json::from_str(&self.arguments).map_err(|e| corrupt("arguments", &e))?;
        let status: TaskStatus = self.status.parse().map_err(|e| corrupt("status", &e))?;
        let result: Option<serde_json::Value> = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt("result", &e))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt("created_at", &e))?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(|e| corrupt("updated_at", &e))?;

        Ok(Task {
            id,
            function: self.function,
            arguments,
            status,
            result,
            error: self.error,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: &Task) -> Result<()> {
        let id = task.id;
        let arguments = serde_json::to_string(&task.arguments)
            .map_err(|e| QueueError::InvalidArguments(e.to_string()))?;
        let result = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| QueueError::InvalidArguments(e.to_string()))?;
        let function = task.function.clone();
        let status = task.status.as_str();
        let error = task.error.clone();
        let created_at = timestamp_text(task.created_at);
        let updated_at = timestamp_text(task.updated_at);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, function, arguments, status, result, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    function,
                    arguments,
                    status,
                    result,
                    error,
                    created_at,
                    updated_at
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    QueueError::DuplicateId(id)
                } else {
                    store_err(e)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn claim_next_pending(&self) -> Result<Option<Task>> {
        let row = self
            .with_conn(|conn| {
                conn.query_row(
                    &format!("{SELECT_COLUMNS} WHERE status = 'PENDING' ORDER BY seq LIMIT 1"),
                    [],
                    TaskRow::from_row,
                )
                .optional()
                .map_err(store_err)
            })
            .await?;
        row.map(|row| {
            let seq = row.seq;
            row.into_task().map_err(|e| match e {
                QueueError::Corrupt(message) => QueueError::CorruptPending { seq, message },
                other => other,
            })
        })
        .transpose()
    }

    async fn fail_corrupt(&self, seq: i64, error: &str) -> Result<()> {
        let now = self.now_text();
        let error = error.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET status = 'FAILED', result = NULL, error = ?2, updated_at = ?3,
                        arguments = CASE WHEN json_valid(arguments)
                            THEN CASE WHEN json_type(arguments) = 'object' THEN arguments ELSE '{}' END
                            ELSE '{}' END
                     WHERE seq = ?1 AND status = 'PENDING'",
                    params![seq, error, now],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(QueueError::Corrupt(format!(
                    "no PENDING record at position {seq}"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn set_running(&self, id: TaskId) -> Result<()> {
        let now = self.now_text();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET status = 'RUNNING', updated_at = ?2 WHERE id = ?1",
                    params![id.to_string(), now],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(QueueError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn set_terminal(&self, id: TaskId, outcome: TaskOutcome) -> Result<()> {
        let now = self.now_text();
        let status = outcome.status().as_str();
        let (result, error) = outcome.into_parts();
        let result = result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| QueueError::Corrupt(format!("task {id}: result: {e}")))?;

        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET status = ?2, result = ?3, error = ?4, updated_at = ?5 WHERE id = ?1",
                    params![id.to_string(), status, result, error, now],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(QueueError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    params![id.to_string()],
                    TaskRow::from_row,
                )
                .optional()
                .map_err(store_err)
            })
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare(&format!("{SELECT_COLUMNS} ORDER BY seq"))
                    .map_err(store_err)?;
                let rows = stmt
                    .query_map([], TaskRow::from_row)
                    .map_err(store_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(store_err)?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn fail_orphaned(&self, reason: &str) -> Result<Vec<TaskId>> {
        let now = self.now_text();
        let reason = reason.to_string();
        let ids = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(store_err)?;
                let ids = {
                    let mut stmt = tx
                        .prepare("SELECT id FROM tasks WHERE status = 'RUNNING' ORDER BY seq")
                        .map_err(store_err)?;
                    stmt.query_map([], |row| row.get::<_, String>(0))
                        .map_err(store_err)?
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .map_err(store_err)?
                };
                tx.execute(
                    "UPDATE tasks SET status = 'FAILED', result = NULL, error = ?1, updated_at = ?2
                     WHERE status = 'RUNNING'",
                    params![reason, now],
                )
                .map_err(store_err)?;
                tx.commit().map_err(store_err)?;
                Ok(ids)
            })
            .await?;

        ids.iter()
            .map(|id| {
                id.parse::<TaskId>()
                    .map_err(|e| QueueError::Corrupt(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn new_task(function: &str, arguments: serde_json::Value) -> Task {
        Task::pending(
            TaskId::from_ulid(Ulid::new()),
            function,
            arguments.as_object().cloned().unwrap_or_default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_then_get_roundtrips_the_record() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = new_task("add_numbers", json!({"b": 5, "a": 2}));
        store.create(&task).await.unwrap();

        let loaded = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.function, "add_numbers");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert!(loaded.result.is_none());
        assert!(loaded.error.is_none());
        // 引数の順序も保存される
        let keys: Vec<&String> = loaded.arguments.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = new_task("a", json!({}));
        store.create(&task).await.unwrap();

        let err = store.create(&task).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(id) if id == task.id));
    }

    #[tokio::test]
    async fn claim_follows_insertion_order_not_id_order() {
        let store = SqliteTaskStore::open_in_memory().unwrap();

        // id の大小と挿入順を逆にする
        let mut late = new_task("late_id", json!({}));
        late.id = TaskId::from_ulid(Ulid::from_parts(2_000, 0));
        let mut early = new_task("early_id", json!({}));
        early.id = TaskId::from_ulid(Ulid::from_parts(1_000, 0));
        store.create(&late).await.unwrap();
        store.create(&early).await.unwrap();

        let first = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(first.id, late.id);

        store.set_running(late.id).await.unwrap();
        let second = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(second.id, early.id);
    }

    #[tokio::test]
    async fn terminal_writes_set_exactly_one_column() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        let store = SqliteTaskStore::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(FixedClock::new(t)));
        let ok = new_task("add_numbers", json!({"a": 2, "b": 5}));
        let bad = new_task("divide", json!({"a": 1, "b": 0}));
        store.create(&ok).await.unwrap();
        store.create(&bad).await.unwrap();

        store.set_running(ok.id).await.unwrap();
        store.set_terminal(ok.id, TaskOutcome::success(json!(7))).await.unwrap();
        store.set_running(bad.id).await.unwrap();
        store
            .set_terminal(bad.id, TaskOutcome::failed("division by zero"))
            .await
            .unwrap();

        let ok = store.get(ok.id).await.unwrap().unwrap();
        assert_eq!(ok.status, TaskStatus::Success);
        assert_eq!(ok.result, Some(json!(7)));
        assert!(ok.error.is_none());
        assert_eq!(ok.updated_at, t);

        let bad = store.get(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert!(bad.result.is_none());
        assert_eq!(bad.error.as_deref(), Some("division by zero"));

        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn updates_on_missing_id_are_not_found() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let id = TaskId::from_ulid(Ulid::new());

        assert!(matches!(store.set_running(id).await, Err(QueueError::NotFound(x)) if x == id));
        assert!(matches!(
            store.set_terminal(id, TaskOutcome::failed("x")).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let task = new_task("say_hello", json!({"name": "Satti"}));
        {
            let store = SqliteTaskStore::open(&path).await.unwrap();
            store.create(&task).await.unwrap();
            store.set_running(task.id).await.unwrap();
            store
                .set_terminal(task.id, TaskOutcome::success(json!("Hello, Satti!")))
                .await
                .unwrap();
        }

        let reopened = SqliteTaskStore::open(&path).await.unwrap();
        let all = reopened.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, task.id);
        assert_eq!(all[0].status, TaskStatus::Success);
        assert_eq!(all[0].result, Some(json!("Hello, Satti!")));
    }

    #[tokio::test]
    async fn fail_orphaned_marks_running_rows() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let a = new_task("a", json!({}));
        let b = new_task("b", json!({}));
        let c = new_task("c", json!({}));
        for t in [&a, &b, &c] {
            store.create(t).await.unwrap();
        }
        store.set_running(a.id).await.unwrap();
        store.set_running(c.id).await.unwrap();

        let failed = store.fail_orphaned("interrupted").await.unwrap();
        assert_eq!(failed, vec![a.id, c.id]);

        let statuses: Vec<TaskStatus> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Failed, TaskStatus::Pending, TaskStatus::Failed]
        );
    }

    #[tokio::test]
    async fn bad_arguments_json_is_reported_as_corrupt() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = new_task("a", json!({}));
        store.create(&task).await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute("UPDATE tasks SET arguments = 'not json'", [])
                    .map_err(store_err)?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.get(task.id).await.unwrap_err();
        assert!(matches!(err, QueueError::Corrupt(_)));
    }

    #[tokio::test]
    async fn undecodable_pending_row_is_reported_with_its_position() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let bad = new_task("a", json!({"x": 1}));
        store.create(&bad).await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute("UPDATE tasks SET arguments = 'not json'", [])
                    .map_err(store_err)?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.claim_next_pending().await.unwrap_err();
        let QueueError::CorruptPending { seq, message } = err else {
            panic!("expected CorruptPending, got {err:?}");
        };
        assert_eq!(seq, 1);
        assert!(message.contains("arguments"));

        store.fail_corrupt(seq, "corrupt record").await.unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Failed);
        assert_eq!(all[0].error.as_deref(), Some("corrupt record"));
        assert!(all[0].arguments.is_empty());
        assert!(store.claim_next_pending().await.unwrap().is_none());

        assert!(matches!(
            store.fail_corrupt(seq, "again").await,
            Err(QueueError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn worker_fails_undecodable_row_and_moves_on() {
        use crate::app::{Iteration, QueueConfig, WorkerLoop};
        use crate::impls::NoopEventSink;
        use crate::typed::FunctionRegistry;

        let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let bad = new_task("add_numbers", json!({"a": 1, "b": 1}));
        let good = new_task("add_numbers", json!({"a": 2, "b": 5}));
        store.create(&bad).await.unwrap();
        store.create(&good).await.unwrap();
        let bad_id = bad.id.to_string();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE tasks SET arguments = 'not json' WHERE id = ?1",
                    params![bad_id],
                )
                .map_err(store_err)?;
                Ok(())
            })
            .await
            .unwrap();

        let mut registry = FunctionRegistry::new();
        registry.register_fn("add_numbers", |a: Arguments| {
            Ok(json!(a["a"].as_i64().unwrap_or_default() + a["b"].as_i64().unwrap_or_default()))
        });
        let worker = WorkerLoop::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(NoopEventSink),
            QueueConfig::default(),
        );

        assert_eq!(worker.run_once().await.unwrap(), Iteration::Undecodable { seq: 1 });
        assert_eq!(
            worker.run_once().await.unwrap(),
            Iteration::Processed {
                task_id: good.id,
                status: TaskStatus::Success
            }
        );
        assert_eq!(worker.run_once().await.unwrap(), Iteration::Idle);

        let bad = store.get(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert!(bad.error.unwrap().starts_with("corrupt record: "));
        assert_eq!(store.get(good.id).await.unwrap().unwrap().result, Some(json!(7)));
    }

    #[tokio::test]
    async fn second_open_of_same_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let first = SqliteTaskStore::open(&path).await.unwrap();
        let err = SqliteTaskStore::open(&path).await.err().unwrap();
        assert!(matches!(&err, QueueError::StoreUnavailable(m) if m.contains("already open")));

        drop(first);
        assert!(SqliteTaskStore::open(&path).await.is_ok());
    }
}
