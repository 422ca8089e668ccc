//! FunctionRegistry - 関数の登録と解決
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権
//!
//! # 設計
//! - 初期化時に構築（mutable）
//! - 実行時は `Arc<FunctionRegistry>` として共有（immutable）
//!
//! グローバル変数にはせず、Queue と WorkerLoop に明示的に渡します。
//! テストごとに独立した registry を作れます。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::function::{FnFunction, Function, Typed, TypedFunction};
use crate::domain::{Arguments, InvocationError, QueueError};

#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Bind `name` to `function`. A previous binding for the same name is
    /// replaced and returned.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn Function>,
    ) -> Option<Arc<dyn Function>> {
        let name = name.into();
        let previous = self.functions.insert(name.clone(), function);
        if previous.is_some() {
            tracing::debug!(function = %name, "replaced existing function binding");
        }
        previous
    }

    pub fn register_typed<F: TypedFunction>(&mut self, function: F) -> Option<Arc<dyn Function>> {
        self.register(F::NAME, Arc::new(Typed::new(function)))
    }

    pub fn register_fn<C>(&mut self, name: impl Into<String>, f: C) -> Option<Arc<dyn Function>>
    where
        C: Fn(Arguments) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnFunction::new(f)))
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Function>, QueueError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(v: Value) -> impl Fn(Arguments) -> Result<Value, InvocationError> + Send + Sync + 'static {
        move |_| Ok(v.clone())
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("one", constant(json!(1)));

        let f = registry.resolve("one").unwrap();
        assert_eq!(f.call(Arguments::new()).await.unwrap(), json!(1));
        assert!(registry.contains("one"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.register_fn("f", constant(json!("old"))).is_none());
        assert!(registry.register_fn("f", constant(json!("new"))).is_some());

        let f = registry.resolve("f").unwrap();
        assert_eq!(f.call(Arguments::new()).await.unwrap(), json!("new"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_name_fails() {
        let registry = FunctionRegistry::new();
        let err = registry.resolve("does_not_exist").err().unwrap();
        assert!(matches!(err, QueueError::UnknownFunction(name) if name == "does_not_exist"));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("say_hello", constant(json!(null)));
        registry.register_fn("add_numbers", constant(json!(null)));
        assert_eq!(registry.names(), vec!["add_numbers", "say_hello"]);
    }
}
