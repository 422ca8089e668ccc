//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteTaskStore**: 永続化される正本（本番用）
//! - **InMemoryTaskStore**: プロセス内だけの正本（テスト用）
//! - **TracingEventSink / NoopEventSink / RecordingEventSink**: EventSink

pub mod event_sinks;
pub mod memory_store;
pub mod sqlite_store;

pub use self::event_sinks::{NoopEventSink, RecordingEventSink, TracingEventSink};
pub use self::memory_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
