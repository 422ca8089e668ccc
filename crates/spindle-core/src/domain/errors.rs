//! Errors - キュー操作のエラー型
//!
//! 関数の実行失敗（[`InvocationError`](super::outcome::InvocationError)）はここに含まれません。
//! それは worker loop の中で FAILED レコードに変換され、呼び出し元には伝播しません。

use super::ids::TaskId;

/// QueueError は submit / store / worker 制御のエラー
///
/// # 分類
/// - 呼び出し元のミス: `UnknownFunction`, `InvalidArguments`
/// - ストアの不変条件違反（ロジックバグ）: `DuplicateId`, `NotFound`, `Corrupt`
/// - 壊れた PENDING レコード: `CorruptPending`（worker が FAILED にして先へ進む）
/// - インフラ障害: `StoreUnavailable`（worker がバックオフ付きで再試行する唯一の種類）
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("function not registered: {0}")]
    UnknownFunction(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("task id already exists: {0}")]
    DuplicateId(TaskId),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("stored task could not be decoded: {0}")]
    Corrupt(String),

    /// The oldest PENDING record could not be decoded. `seq` is its
    /// insertion position, enough for the store to mark it FAILED.
    #[error("pending task at position {seq} could not be decoded: {message}")]
    CorruptPending { seq: i64, message: String },

    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("a worker is already running for this app")]
    WorkerAlreadyRunning,

    #[error("worker loop crashed: {0}")]
    WorkerCrashed(String),
}

impl QueueError {
    /// Transient persistence failure (worth retrying).
    pub fn is_store_failure(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable(_))
    }
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
