//! Domain identifiers.
//!
//! # ULID ベースの TaskId
//! TaskId は ULID (Universally Unique Lexicographically Sortable Identifier) を包む newtype です。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **調整なしで生成可能**: 中央の採番テーブルが不要
//! - **128-bit**: UUID と同じサイズ
//!
//! 注意: FIFO の順序は TaskId ではなく TaskStore の挿入順で決まります。
//! 同じミリ秒内に生成された ULID はランダム部分で並ぶため、生成順とは一致しません。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a Task (one submitted function invocation).
///
/// Serialized and persisted as the 26-character Crockford base32 ULID text.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    /// ULID から TaskId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned when a string is not a valid ULID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task id {input:?}: {reason}")]
pub struct ParseTaskIdError {
    input: String,
    reason: String,
}

impl FromStr for TaskId {
    type Err = ParseTaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(TaskId::from_ulid)
            .map_err(|e| ParseTaskIdError {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}
