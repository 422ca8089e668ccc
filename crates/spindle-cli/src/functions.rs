//! Functions registered by the `spindle` binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::{AppBuilder, InvocationError, TypedFunction};

/// Names registered by [`register_all`].
pub const NAMES: [&str; 3] = [AddNumbers::NAME, SayHello::NAME, Divide::NAME];

pub fn register_all(builder: AppBuilder) -> AppBuilder {
    builder
        .register_typed(AddNumbers)
        .register_typed(SayHello)
        .register_typed(Divide)
        .expect_functions(&NAMES)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Operands {
    pub a: i64,
    pub b: i64,
}

pub struct AddNumbers;

#[async_trait]
impl TypedFunction for AddNumbers {
    const NAME: &'static str = "add_numbers";
    type Args = Operands;
    type Output = i64;

    async fn call(&self, args: Operands) -> Result<i64, InvocationError> {
        args.a
            .checked_add(args.b)
            .ok_or_else(|| InvocationError::new("integer overflow"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Greeting {
    pub name: String,
}

pub struct SayHello;

#[async_trait]
impl TypedFunction for SayHello {
    const NAME: &'static str = "say_hello";
    type Args = Greeting;
    type Output = String;

    async fn call(&self, args: Greeting) -> Result<String, InvocationError> {
        Ok(format!("Hello, {}!", args.name))
    }
}

/// Integer division; fails on a zero divisor.
pub struct Divide;

#[async_trait]
impl TypedFunction for Divide {
    const NAME: &'static str = "divide";
    type Args = Operands;
    type Output = i64;

    async fn call(&self, args: Operands) -> Result<i64, InvocationError> {
        if args.b == 0 {
            return Err(InvocationError::new("division by zero"));
        }
        args.a
            .checked_div(args.b)
            .ok_or_else(|| InvocationError::new("integer overflow"))
    }
}
