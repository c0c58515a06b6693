use crate::compile_columns::{classify, collect_columns, column_ref, Classification};
use crate::compile_expr::ExprAst;
use crate::error::CompileError;
use crate::plan::{ArityMap, ColumnRef, FormulaFn, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnShape {
    /// Bare column reference.
    Identity,
    /// `f(:a, :b)`: the callee is the function.
    SimpleCall,
    /// `f.(:a, :b)`: the callee applied row by row.
    ElementwiseCall,
    Closure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub sources: Vec<ColumnRef>,
    pub function: FormulaFn,
    pub shape: FnShape,
}

/// Builds the function object for a formula body.
///
/// A simple call returns the callee with the non-unique column collection so
/// `f(:x, :x)` keeps two arguments. Anything else becomes a closure with one
/// parameter per unique column reference.
pub fn synthesize(expr: &ExprAst, simple_calls: bool) -> Result<Synthesized, CompileError> {
    if let Some(column) = column_ref(expr)? {
        return Ok(Synthesized {
            sources: vec![column],
            function: FormulaFn::Identity,
            shape: FnShape::Identity,
        });
    }
    if simple_calls {
        if let Some(simple) = try_simple_call(expr)? {
            return Ok(simple);
        }
    }
    let sources = collect_columns(expr, true)?;
    let body = substitute_columns(expr, &sources)?;
    Ok(Synthesized {
        function: FormulaFn::Closure {
            params: sources.len(),
            body,
        },
        sources,
        shape: FnShape::Closure,
    })
}

fn try_simple_call(expr: &ExprAst) -> Result<Option<Synthesized>, CompileError> {
    let (callee, args, elementwise): (&str, Vec<&ExprAst>, bool) = match expr {
        ExprAst::Call {
            name,
            args,
            broadcast,
        } => (name.as_str(), args.iter().collect(), *broadcast),
        ExprAst::Binary { op, lhs, rhs } => (op.symbol(), vec![lhs.as_ref(), rhs.as_ref()], false),
        ExprAst::Unary { op, expr } => (op.callee(), vec![expr.as_ref()], false),
        _ => return Ok(None),
    };
    if args.is_empty() {
        return Ok(None);
    }
    let mut arg_columns = Vec::with_capacity(args.len());
    for arg in args {
        match column_ref(arg)? {
            Some(column) => arg_columns.push(column),
            None => return Ok(None),
        }
    }
    // Every collected reference must be consumed positionally by the call.
    if collect_columns(expr, false)? != arg_columns {
        return Ok(None);
    }
    Ok(Some(Synthesized {
        sources: arg_columns,
        function: FormulaFn::Named(callee.to_string()),
        shape: if elementwise {
            FnShape::ElementwiseCall
        } else {
            FnShape::SimpleCall
        },
    }))
}

/// Replaces each column reference with the parameter of its source position and
/// unwraps escapes to their literal payload.
pub fn substitute_columns(expr: &ExprAst, sources: &[ColumnRef]) -> Result<ExprAst, CompileError> {
    match classify(expr)? {
        Classification::Column(column) => {
            let idx = sources.iter().position(|s| *s == column).ok_or_else(|| {
                CompileError::InvalidExpression {
                    expr: expr.to_string(),
                    reason: "column reference missing from collected sources".to_string(),
                }
            })?;
            Ok(ExprAst::Param(idx))
        }
        Classification::Escaped => match expr {
            ExprAst::Escape(payload) => Ok(payload.as_ref().clone()),
            other => Ok(other.clone()),
        },
        Classification::Qualified => Ok(expr.clone()),
        Classification::Computation => match expr {
            ExprAst::Assign { target, value } => Ok(ExprAst::Assign {
                target: target.clone(),
                value: Box::new(substitute_columns(value, sources)?),
            }),
            _ => expr.try_map_children(|child| substitute_columns(child, sources)),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub sources: Vec<Source>,
    pub function: FormulaFn,
}

/// Defers multi-column sources and wraps the function in an arity-aware
/// regrouping layer when any source is a group.
pub fn materialize(columns: Vec<ColumnRef>, function: FormulaFn) -> Materialized {
    let sources: Vec<Source> = columns.into_iter().map(Source::from_ref).collect();
    let function = if sources.iter().any(|s| s.group_kind().is_some()) {
        FormulaFn::Regroup {
            arity: ArityMap::from_sources(&sources),
            inner: Box::new(function),
        }
    } else {
        function
    };
    Materialized { sources, function }
}
