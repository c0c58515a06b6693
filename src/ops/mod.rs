//! Builtin function layer.
//!
//! Extension path (minimal touch points):
//! 1) implement the function in `elem.rs` / `stats.rs` / `text.rs` / `cols.rs`,
//! 2) register its meta in `catalog.rs` (`BUILTINS`),
//! 3) add runtime tests.

use crate::error::EvalError;
use crate::types::Value;

pub type BuiltinFn = fn(args: &[Value]) -> Result<Value, EvalError>;

pub mod catalog;

mod cols;
mod elem;
mod stats;
mod text;

pub use catalog::{Arity, BuiltinFamily, BuiltinMeta, BuiltinRegistry};

#[inline]
pub(crate) fn invalid(name: &str, value: &Value) -> EvalError {
    EvalError::InvalidArgument {
        name: name.to_string(),
        kind: value.kind(),
    }
}
