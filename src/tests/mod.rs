use crate::compile::Planner;
use crate::error::{BindError, CompileError, EvalError};
use crate::plan::{BoundPipeline, CompiledPipeline, SinkTarget};
use crate::runtime::Runtime;
use crate::types::{EntryPoint, FormulaRequest, TableSchema, Value};
use crate::SimplePlanner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod compile;

fn request(entry: EntryPoint, args: &[&str]) -> FormulaRequest {
    FormulaRequest::new(entry, args.iter().map(|s| s.to_string()).collect())
}

fn compile_ok(entry: EntryPoint, args: &[&str]) -> CompiledPipeline {
    let (pipeline, _) = SimplePlanner
        .compile(&request(entry, args))
        .expect("compile should succeed");
    pipeline
}

fn compile_err(entry: EntryPoint, args: &[&str]) -> CompileError {
    SimplePlanner
        .compile(&request(entry, args))
        .expect_err("compile should fail")
}

fn schema(names: &[&str]) -> TableSchema {
    TableSchema::new(names.iter().copied())
}

fn bind_with(
    runtime: &Runtime,
    entry: EntryPoint,
    args: &[&str],
    columns: &[&str],
) -> Result<BoundPipeline, BindError> {
    let pipeline = compile_ok(entry, args);
    SimplePlanner.bind(&pipeline, &schema(columns), runtime)
}

fn bind_ok(entry: EntryPoint, args: &[&str], columns: &[&str]) -> BoundPipeline {
    bind_with(&Runtime::default(), entry, args, columns).expect("bind should succeed")
}

/// Output names of every invocation, in order.
fn sink_names(bound: &BoundPipeline) -> Vec<String> {
    bound
        .invocations
        .iter()
        .flat_map(|inv| match &inv.sink {
            SinkTarget::Names(names) => names.clone(),
            SinkTarget::ExpandRecord => vec!["<record>".to_string()],
        })
        .collect()
}

fn ints(items: &[i64]) -> Value {
    Value::List(items.iter().map(|v| Value::Int(*v)).collect())
}

/// Runtime whose `h` sums its integer arguments and counts invocations.
fn counting_runtime(calls: Arc<AtomicUsize>) -> Runtime {
    let mut runtime = Runtime::new();
    runtime.register("h", move |args: &[Value]| {
        calls.fetch_add(1, Ordering::SeqCst);
        let mut total = 0;
        for arg in args {
            match arg {
                Value::Int(v) => total += v,
                other => {
                    return Err(EvalError::InvalidArgument {
                        name: "h".to_string(),
                        kind: other.kind(),
                    })
                }
            }
        }
        Ok(Value::Int(total))
    });
    runtime
}
