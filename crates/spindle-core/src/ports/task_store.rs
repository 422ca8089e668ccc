//! TaskStore port - タスクの正本（source of truth）
//!
//! # 実装
//! - **SqliteTaskStore**: 永続化される本番用
//! - **InMemoryTaskStore**: プロセス内のみ（テスト用）
//!
//! # 設計原則
//! - 各操作は互いにアトミック
//! - 書き込みは返る前にコミット済み（再起動後も最後のコミットが見える）
//! - FIFO は挿入順で決まる（TaskId の値には依存しない）

use async_trait::async_trait;

use crate::domain::{Result, Task, TaskId, TaskOutcome};

/// TaskStore は tasks テーブルへのインターフェース
///
/// `claim_next_pending` と `set_running` は別々の呼び出しです。
/// これが安全なのは worker が 1 つだけだからで、複数 worker にする場合は
/// 「条件付き UPDATE で行を返す」ような単一のアトミック claim に統合しなければなりません。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Fails with `DuplicateId` if the id exists.
    async fn create(&self, task: &Task) -> Result<()>;

    /// Oldest PENDING record by insertion order. Does not change its status.
    ///
    /// A record that cannot be decoded is reported as `CorruptPending`
    /// carrying its insertion position.
    async fn claim_next_pending(&self) -> Result<Option<Task>>;

    /// Mark the PENDING record at insertion position `seq` FAILED with
    /// `error`. Used for records `claim_next_pending` could not decode;
    /// arguments that are not a JSON object are replaced by `{}` so the
    /// record can be listed afterwards.
    async fn fail_corrupt(&self, seq: i64, error: &str) -> Result<()>;

    /// Transition to RUNNING. Fails with `NotFound` if the id is absent.
    async fn set_running(&self, id: TaskId) -> Result<()>;

    /// Write SUCCESS + result or FAILED + error. Fails with `NotFound` if the id is absent.
    async fn set_terminal(&self, id: TaskId, outcome: TaskOutcome) -> Result<()>;

    /// Direct lookup.
    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// Every record, in insertion order.
    async fn list_all(&self) -> Result<Vec<Task>>;

    /// Mark every RUNNING record FAILED with `reason` and return their ids
    /// in insertion order.
    async fn fail_orphaned(&self, reason: &str) -> Result<Vec<TaskId>>;
}
