//! spindle-core
//!
//! Core building blocks for the Spindle task queue: callers submit named
//! function invocations, a single background worker executes them in
//! submission order, and every outcome is persisted.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, outcome, errors, events）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator, EventSink）
//! - **impls**: 実装（SqliteTaskStore, InMemoryTaskStore, TracingEventSink）
//! - **typed**: 関数 API（Function, TypedFunction, FunctionRegistry）
//! - **app**: アプリケーションロジック（builder, queue, worker_loop, config, status）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{App, AppBuilder, Queue, QueueConfig, StopOutcome, WorkerHandle};
pub use domain::{Arguments, InvocationError, QueueError, Task, TaskId, TaskOutcome, TaskStatus};
pub use typed::{Function, FunctionRegistry, TypedFunction};
