use crate::compile_expr::ExprAst;
use crate::error::EvalError;
use crate::ops::BuiltinRegistry;
use crate::plan::{ArityEntry, FormulaFn, Invocation};
use crate::types::{ApplicationMode, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Evaluates compiled function objects, selector expressions and name
/// templates.
///
/// Registered functions shadow builtins of the same name. Constants back
/// qualified paths (`Mod.member`) and free identifiers.
#[derive(Clone, Default)]
pub struct Runtime {
    functions: HashMap<String, NativeFn>,
    constants: HashMap<String, Value>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Runtime")
            .field("functions", &names)
            .field("constants", &self.constants)
            .finish()
    }
}

#[derive(Default)]
struct Frame<'p> {
    params: &'p [Value],
    locals: HashMap<u32, Value>,
    vars: HashMap<String, Value>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_constant(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.constants.insert(path.into(), value);
        self
    }

    pub fn call_named(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        if let Some(f) = self.functions.get(name) {
            return f(args);
        }
        match BuiltinRegistry::get(name) {
            Some(meta) => meta.call(args),
            None => Err(EvalError::UnknownFunction {
                name: name.to_string(),
            }),
        }
    }

    /// Invokes a compiled function object with flattened arguments.
    pub fn call(&self, function: &FormulaFn, args: &[Value]) -> Result<Value, EvalError> {
        match function {
            FormulaFn::Identity => match args {
                [single] => Ok(single.clone()),
                _ => Err(EvalError::InvalidArity {
                    name: "identity".to_string(),
                    expected: 1,
                    actual: args.len(),
                }),
            },
            FormulaFn::Named(name) => self.call_named(name, args),
            FormulaFn::Closure { params, body } => {
                if args.len() != *params {
                    return Err(EvalError::InvalidArity {
                        name: function.display_name().to_string(),
                        expected: *params,
                        actual: args.len(),
                    });
                }
                self.eval(body, args)
            }
            FormulaFn::Regroup { arity, inner } => {
                let Some(expected) = arity.flat_len() else {
                    let position = arity
                        .entries
                        .iter()
                        .position(|e| matches!(e, ArityEntry::Group { size: None, .. }))
                        .unwrap_or_default();
                    return Err(EvalError::UnresolvedGroup { position });
                };
                if expected != args.len() {
                    return Err(EvalError::InvalidArity {
                        name: inner.display_name().to_string(),
                        expected,
                        actual: args.len(),
                    });
                }
                let mut grouped = Vec::with_capacity(arity.entries.len());
                let mut rest = args;
                for entry in &arity.entries {
                    let (chunk, tail) = match entry {
                        ArityEntry::Scalar => rest.split_at(1),
                        ArityEntry::Group { size, .. } => rest.split_at(size.unwrap_or_default()),
                    };
                    grouped.push(match entry {
                        ArityEntry::Scalar => chunk[0].clone(),
                        ArityEntry::Group { .. } => Value::Tuple(chunk.to_vec()),
                    });
                    rest = tail;
                }
                self.call(inner, &grouped)
            }
            FormulaFn::PassMissing(inner) => {
                if args.iter().any(Value::is_missing) {
                    return Ok(Value::Missing);
                }
                self.call(inner, args)
            }
        }
    }

    /// Applies one bound invocation to its argument columns, given as lists in
    /// flattened argument order. Row-wise invocations call once per row.
    pub fn apply(&self, invocation: &Invocation, columns: &[Value]) -> Result<Value, EvalError> {
        match invocation.mode {
            ApplicationMode::ByColumn => self.call(&invocation.function, columns),
            ApplicationMode::ByRow => {
                let mut rows: Option<usize> = None;
                for column in columns {
                    if let Value::List(items) = column {
                        match rows {
                            Some(n) if n != items.len() => {
                                return Err(EvalError::LengthMismatch {
                                    lhs: n,
                                    rhs: items.len(),
                                })
                            }
                            _ => rows = Some(items.len()),
                        }
                    }
                }
                let Some(rows) = rows else {
                    return self.call(&invocation.function, columns);
                };
                let mut out = Vec::with_capacity(rows);
                for row in 0..rows {
                    let args: Vec<Value> = columns.iter().map(|c| row_value(c, row)).collect();
                    out.push(self.call(&invocation.function, &args)?);
                }
                Ok(Value::List(out))
            }
        }
    }

    /// Evaluates an expression with positional parameters bound to `params`.
    pub fn eval(&self, expr: &ExprAst, params: &[Value]) -> Result<Value, EvalError> {
        let mut frame = Frame {
            params,
            ..Frame::default()
        };
        self.eval_in(expr, &mut frame)
    }

    fn eval_in(&self, expr: &ExprAst, frame: &mut Frame<'_>) -> Result<Value, EvalError> {
        match expr {
            ExprAst::Integer(v) => Ok(Value::Int(*v)),
            ExprAst::Number(v) => Ok(Value::Float(*v)),
            ExprAst::Str(s) => Ok(Value::Str(s.clone())),
            ExprAst::Bool(v) => Ok(Value::Bool(*v)),
            ExprAst::Missing => Ok(Value::Missing),
            ExprAst::Symbol(name) => Ok(Value::Symbol(name.clone())),
            ExprAst::Identifier(name) => frame
                .vars
                .get(name)
                .or_else(|| self.constants.get(name))
                .cloned()
                .ok_or_else(|| EvalError::UnboundVariable { name: name.clone() }),
            ExprAst::Path(parts) => {
                let path = parts.join(".");
                self.constants
                    .get(&path)
                    .cloned()
                    .ok_or(EvalError::UnboundVariable { name: path })
            }
            ExprAst::Param(idx) => {
                frame
                    .params
                    .get(*idx)
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundVariable {
                        name: expr.to_string(),
                    })
            }
            ExprAst::Local(id) => {
                frame
                    .locals
                    .get(id)
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundVariable {
                        name: expr.to_string(),
                    })
            }
            ExprAst::Escape(inner) => self.eval_in(inner, frame),
            ExprAst::Dollar(_) | ExprAst::Braced { .. } => Err(EvalError::UnloweredColumn),
            ExprAst::Annotated { name, .. } => Err(EvalError::UnexpectedAnnotation {
                name: name.clone(),
            }),
            ExprAst::Call {
                name,
                args,
                broadcast,
            } => {
                let values = self.eval_all(args, frame)?;
                if *broadcast {
                    self.broadcast_call(name, &values)
                } else {
                    self.call_named(name, &values)
                }
            }
            ExprAst::Unary { op, expr } => {
                let value = self.eval_in(expr, frame)?;
                self.call_named(op.callee(), &[value])
            }
            ExprAst::Binary { op, lhs, rhs } => {
                let lhs = self.eval_in(lhs, frame)?;
                let rhs = self.eval_in(rhs, frame)?;
                self.call_named(op.symbol(), &[lhs, rhs])
            }
            ExprAst::Assign { target, value } => {
                let value = self.eval_in(value, frame)?;
                bind(target, value.clone(), frame)?;
                Ok(value)
            }
            ExprAst::Block(items) => {
                let mut last = Value::Missing;
                for item in items {
                    last = self.eval_in(item, frame)?;
                }
                Ok(last)
            }
            ExprAst::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, frame)?)),
            ExprAst::List(items) => Ok(Value::List(self.eval_all(items, frame)?)),
            ExprAst::Record(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    out.push((name.clone(), self.eval_in(value, frame)?));
                }
                Ok(Value::Record(out))
            }
        }
    }

    fn eval_all(&self, items: &[ExprAst], frame: &mut Frame<'_>) -> Result<Vec<Value>, EvalError> {
        items.iter().map(|item| self.eval_in(item, frame)).collect()
    }

    /// `f.(args...)`: one call per list element, scalars repeated.
    fn broadcast_call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let mut len: Option<usize> = None;
        for arg in args {
            if let Value::List(items) = arg {
                match len {
                    Some(n) if n != items.len() => {
                        return Err(EvalError::LengthMismatch {
                            lhs: n,
                            rhs: items.len(),
                        })
                    }
                    _ => len = Some(items.len()),
                }
            }
        }
        let Some(len) = len else {
            return self.call_named(name, args);
        };
        let mut out = Vec::with_capacity(len);
        for idx in 0..len {
            let row: Vec<Value> = args.iter().map(|arg| row_value(arg, idx)).collect();
            out.push(self.call_named(name, &row)?);
        }
        Ok(Value::List(out))
    }
}

fn row_value(column: &Value, row: usize) -> Value {
    match column {
        Value::List(items) => items.get(row).cloned().unwrap_or(Value::Missing),
        scalar => scalar.clone(),
    }
}

fn bind(target: &ExprAst, value: Value, frame: &mut Frame<'_>) -> Result<(), EvalError> {
    match target {
        ExprAst::Identifier(name) => {
            frame.vars.insert(name.clone(), value);
            Ok(())
        }
        ExprAst::Local(id) => {
            frame.locals.insert(*id, value);
            Ok(())
        }
        ExprAst::Tuple(targets) => {
            let items = match value {
                Value::Tuple(items) | Value::List(items) => items,
                Value::Record(fields) => fields.into_iter().map(|(_, v)| v).collect(),
                _ => return Err(EvalError::InvalidAssignment),
            };
            if items.len() != targets.len() {
                return Err(EvalError::DestructureArity {
                    expected: targets.len(),
                    actual: items.len(),
                });
            }
            for (target, item) in targets.iter().zip(items) {
                bind(target, item, frame)?;
            }
            Ok(())
        }
        _ => Err(EvalError::InvalidAssignment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_expr::parse_expression;
    use crate::plan::{ArityMap, GroupKind, SinkTarget};

    fn eval(src: &str) -> Result<Value, EvalError> {
        let ast = parse_expression(src).expect("parse should succeed");
        Runtime::default().eval(&ast, &[])
    }

    #[test]
    fn evaluates_blocks_with_local_bindings() {
        assert_eq!(
            eval("begin a = 2; (b, c) = (a * 3, 1); b + c end").expect("eval"),
            Value::Int(7)
        );
        assert!(matches!(
            eval("begin (a, b) = (1, 2, 3) end"),
            Err(EvalError::DestructureArity {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn unlowered_columns_and_annotations_fail() {
        assert!(matches!(eval(":a"), Ok(Value::Symbol(_))));
        assert!(matches!(eval("$a"), Err(EvalError::UnloweredColumn)));
        assert!(matches!(
            eval("@byrow f(1)"),
            Err(EvalError::UnexpectedAnnotation { .. })
        ));
        assert!(matches!(
            eval("nope(1)"),
            Err(EvalError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn registered_functions_and_constants() {
        let mut runtime = Runtime::new();
        runtime
            .register("double", |args: &[Value]| match args {
                [Value::Int(v)] => Ok(Value::Int(v * 2)),
                _ => Err(EvalError::InvalidAssignment),
            })
            .register_constant("Consts.k", Value::Int(5));
        let ast = parse_expression("double(Consts.k)").expect("parse");
        assert_eq!(runtime.eval(&ast, &[]).expect("eval"), Value::Int(10));
    }

    #[test]
    fn broadcast_call_maps_over_lists() {
        assert_eq!(
            eval("string.([1, 2], \"x\")").expect("eval"),
            Value::List(vec![Value::str("1x"), Value::str("2x")])
        );
    }

    #[test]
    fn regroup_rebuilds_group_arguments() {
        let runtime = Runtime::default();
        let function = FormulaFn::Regroup {
            arity: ArityMap {
                entries: vec![
                    ArityEntry::Scalar,
                    ArityEntry::Group {
                        kind: GroupKind::Aggregate,
                        size: Some(2),
                    },
                ],
            },
            inner: Box::new(FormulaFn::Named("tuple".to_string())),
        };
        let out = runtime
            .call(&function, &[Value::Int(1), Value::Int(2), Value::Int(3)])
            .expect("call");
        assert_eq!(
            out,
            Value::Tuple(vec![
                Value::Int(1),
                Value::Tuple(vec![Value::Int(2), Value::Int(3)])
            ])
        );
        let unsized_fn = FormulaFn::Regroup {
            arity: ArityMap::from_sources(&[crate::plan::Source::Deferred {
                selector: ExprAst::call("All", vec![]),
                kind: GroupKind::Aggregate,
            }]),
            inner: Box::new(FormulaFn::Identity),
        };
        assert!(matches!(
            runtime.call(&unsized_fn, &[Value::Int(1)]),
            Err(EvalError::UnresolvedGroup { position: 0 })
        ));
    }

    #[test]
    fn row_wise_apply_calls_once_per_row() {
        let runtime = Runtime::default();
        let invocation = Invocation {
            args: vec![vec!["a".to_string()], vec!["b".to_string()]],
            arity: ArityMap {
                entries: vec![ArityEntry::Scalar, ArityEntry::Scalar],
            },
            function: FormulaFn::Named("max".to_string()),
            sink: SinkTarget::Names(vec!["a_b_max".to_string()]),
            mode: ApplicationMode::ByRow,
        };
        let columns = [
            Value::List(vec![Value::Int(1), Value::Int(5)]),
            Value::List(vec![Value::Int(4), Value::Int(2)]),
        ];
        assert_eq!(
            runtime.apply(&invocation, &columns).expect("apply"),
            Value::List(vec![Value::Int(4), Value::Int(5)])
        );
    }
}
