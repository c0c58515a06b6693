pub mod compile;
mod compile_columns;
pub mod compile_expr;
mod compile_fn;
pub mod compile_modifiers;
pub mod compile_sink;
pub mod error;
pub mod ops;
pub mod plan;
pub mod runtime;
pub mod subset;
pub mod types;

pub use compile::{Planner, SimplePlanner};
pub use compile_expr::{parse_expression, ExprAst};
pub use error::{BindError, CompileError, EvalError};
pub use plan::{
    BoundPipeline, CompileManifest, CompiledFormula, CompiledPipeline, FormulaFn, Invocation,
    SinkDescriptor, SinkTarget,
};
pub use runtime::{NativeFn, Runtime};
pub use subset::{run_with_subset, ViewExecutor};
pub use types::{
    ApplicationMode, ColumnResolver, CompileOptions, EntryPoint, FormulaRequest, Selector,
    TableSchema, Value,
};

#[cfg(test)]
mod tests;
