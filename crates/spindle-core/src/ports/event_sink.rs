//! EventSink port - 診断イベントの出力先
//!
//! # 実装
//! - TracingEventSink: tracing にログとして出す（デフォルト）
//! - NoopEventSink: 何もしない
//! - RecordingEventSink: メモリに溜める（テスト用）

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// best-effort: 失敗してもキューの動作には影響させないため、Result を返しません。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}
