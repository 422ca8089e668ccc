//! Function trait - 登録される関数の定義
//!
//! # 学習ポイント
//! - Object-safe trait (Function)
//! - 型付き trait (TypedFunction) と Type erasure パターン (Typed<F> → Function)
//! - クロージャのアダプタ (FnFunction)

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{Arguments, InvocationError};

/// Function はすべての登録関数が持つ統一シグネチャ
///
/// `(arguments) -> Result<value, description>`。
/// 名前付き引数は 1 つの JSON object として渡されます（リフレクションなし）。
///
/// # Object Safety
/// - メソッドはジェネリックではない
/// - `Arc<dyn Function>` として registry に格納できる
#[async_trait]
pub trait Function: Send + Sync {
    async fn call(&self, arguments: Arguments) -> Result<Value, InvocationError>;
}

/// TypedFunction は名前と引数・戻り値の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Deserialize)]
/// struct AddArgs { a: i64, b: i64 }
///
/// struct AddNumbers;
///
/// #[async_trait]
/// impl TypedFunction for AddNumbers {
///     const NAME: &'static str = "add_numbers";
///     type Args = AddArgs;
///     type Output = i64;
///
///     async fn call(&self, args: AddArgs) -> Result<i64, InvocationError> {
///         Ok(args.a + args.b)
///     }
/// }
/// ```
///
/// 引数 object のキーが `Args` のフィールドに serde でマップされます。
#[async_trait]
pub trait TypedFunction: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn call(&self, args: Self::Args) -> Result<Self::Output, InvocationError>;
}

/// TypedFunction を Function に変換するラッパー
pub struct Typed<F: TypedFunction> {
    inner: F,
}

impl<F: TypedFunction> Typed<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: TypedFunction> Function for Typed<F> {
    async fn call(&self, arguments: Arguments) -> Result<Value, InvocationError> {
        let args: F::Args = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| InvocationError::new(format!("invalid arguments for {}: {e}", F::NAME)))?;
        let output = self.inner.call(args).await?;
        serde_json::to_value(output).map_err(|e| {
            InvocationError::new(format!("could not serialize result of {}: {e}", F::NAME))
        })
    }
}

/// 同期クロージャを Function にするラッパー
pub struct FnFunction<C> {
    f: C,
}

impl<C> FnFunction<C>
where
    C: Fn(Arguments) -> Result<Value, InvocationError> + Send + Sync + 'static,
{
    pub fn new(f: C) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<C> Function for FnFunction<C>
where
    C: Fn(Arguments) -> Result<Value, InvocationError> + Send + Sync + 'static,
{
    async fn call(&self, arguments: Arguments) -> Result<Value, InvocationError> {
        (self.f)(arguments)
    }
}
