//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports の差し替え（store / clock / id / event sink）

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use super::config::QueueConfig;
use super::queue::Queue;
use super::worker_loop::{ActiveWorker, WorkerHandle, WorkerLoop};
use crate::domain::{Arguments, InvocationError, Result};
use crate::impls::TracingEventSink;
use crate::ports::{Clock, EventSink, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{Function, FunctionRegistry, TypedFunction};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .with_store(SqliteTaskStore::open("tasks.db").await?)
///     .register_typed(AddNumbers)
///     .expect_functions(&["add_numbers"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store が未設定なら BuildError::MissingStore
/// - expect_functions() の名前がすべて登録済みでなければ BuildError::MissingFunctions
pub struct AppBuilder {
    registry: FunctionRegistry,
    expected_functions: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Arc<dyn EventSink>,
    config: QueueConfig,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing functions: {0:?}. These functions were expected but not registered.")]
    MissingFunctions(Vec<String>),

    #[error("No task store configured. Call with_store() before build().")]
    MissingStore,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: FunctionRegistry::new(),
            expected_functions: None,
            store: None,
            clock: Arc::new(SystemClock),
            ids: None,
            events: Arc::new(TracingEventSink),
            config: QueueConfig::default(),
        }
    }

    /// Bind `name` to `function`, replacing any earlier binding.
    pub fn register(mut self, name: impl Into<String>, function: Arc<dyn Function>) -> Self {
        self.registry.register(name, function);
        self
    }

    pub fn register_typed<F: TypedFunction>(mut self, function: F) -> Self {
        self.registry.register_typed(function);
        self
    }

    pub fn register_fn<C>(mut self, name: impl Into<String>, f: C) -> Self
    where
        C: Fn(Arguments) -> std::result::Result<serde_json::Value, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register_fn(name, f);
        self
    }

    /// 期待される関数名のリストを設定（build() で検証）
    pub fn expect_functions(mut self, names: &[&str]) -> Self {
        self.expected_functions = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn with_store(mut self, store: impl TaskStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Clock for record timestamps and id generation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` on the configured clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to `TracingEventSink`.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// AppBuilder を検証して App を生成
    pub fn build(self) -> std::result::Result<App, BuildError> {
        if let Some(expected) = &self.expected_functions {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingFunctions(missing));
            }
        }
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));

        let registry = Arc::new(self.registry);
        tracing::debug!(functions = ?registry.names(), "app built");

        let queue = Queue::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            ids,
            self.clock,
            Arc::clone(&self.events),
        );
        Ok(App {
            queue,
            registry,
            store,
            events: self.events,
            config: self.config,
            worker_active: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App はアプリケーションのランタイム
///
/// - `queue()` で submit / 参照
/// - `start_worker()` で単一の worker を起動
pub struct App {
    queue: Queue,
    registry: Arc<FunctionRegistry>,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
    config: QueueConfig,
    worker_active: Arc<AtomicBool>,
}

impl App {
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spawn the worker loop on the current tokio runtime.
    ///
    /// Fails with `WorkerAlreadyRunning` while a worker started from this
    /// `App` is still alive.
    pub fn start_worker(&self) -> Result<WorkerHandle> {
        let active = ActiveWorker::acquire(&self.worker_active)?;
        let worker = WorkerLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            self.config.clone(),
        );
        Ok(WorkerHandle::spawn_exclusive(worker, active))
    }
}
