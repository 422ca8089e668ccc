//! Typed - 関数 API
//!
//! # 二層構造
//! - **表層（Typed）**: `TypedFunction` trait - 引数・戻り値が型付き
//! - **内部（Dyn）**: `Function` trait - object-safe, JSON in / JSON out

pub mod function;
pub mod registry;

pub use self::function::{FnFunction, Function, Typed, TypedFunction};
pub use self::registry::FunctionRegistry;
