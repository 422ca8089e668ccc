//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Queue**: submit とタスクの参照
//! - **WorkerLoop**: タスク実行ループ（claim→running→invoke→terminal）
//! - **QueueConfig**: poll 間隔、停止 timeout、store 呼び出しの再試行
//! - **QueueCounts**: 状態ごとの件数

pub mod builder;
pub mod config;
pub mod queue;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::config::{ConfigError, QueueConfig, StoreRetryPolicy};
pub use self::queue::Queue;
pub use self::status::QueueCounts;
pub use self::worker_loop::{Iteration, ORPHAN_REASON, StopOutcome, WorkerHandle, WorkerLoop};
