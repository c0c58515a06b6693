use crate::compile_expr::{BraceKind, ExprAst};
use crate::error::CompileError;
use crate::plan::ColumnRef;

/// What a sub-expression denotes for column collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Column(ColumnRef),
    /// `^(...)`: literal payload, never a column.
    Escaped,
    /// `Mod.member`: external constant, never a column.
    Qualified,
    Computation,
}

pub fn classify(expr: &ExprAst) -> Result<Classification, CompileError> {
    let class = match expr {
        ExprAst::Symbol(name) => Classification::Column(ColumnRef::Name(name.clone())),
        ExprAst::Dollar(inner) => Classification::Column(classify_dollar(expr, inner)?),
        ExprAst::Braced { kind, inner } => {
            let Some(inner) = inner else {
                return Err(CompileError::InvalidExpression {
                    expr: expr.to_string(),
                    reason: "empty `{}` is only valid as an output name placeholder".to_string(),
                });
            };
            let selector = inner.as_ref().clone();
            Classification::Column(match kind {
                BraceKind::Single => ColumnRef::Broadcast(selector),
                BraceKind::Double => ColumnRef::Aggregate(selector),
            })
        }
        ExprAst::Escape(_) => Classification::Escaped,
        ExprAst::Path(_) => Classification::Qualified,
        _ => Classification::Computation,
    };
    Ok(class)
}

fn classify_dollar(expr: &ExprAst, inner: &ExprAst) -> Result<ColumnRef, CompileError> {
    match inner {
        ExprAst::Str(name) | ExprAst::Symbol(name) => Ok(ColumnRef::Name(name.clone())),
        ExprAst::Integer(pos) if *pos >= 1 => Ok(ColumnRef::Position(*pos)),
        ExprAst::Integer(pos) => Err(CompileError::InvalidExpression {
            expr: expr.to_string(),
            reason: format!("column positions are 1-based, got {pos}"),
        }),
        ExprAst::List(_) => Ok(ColumnRef::Broadcast(inner.clone())),
        other => Ok(ColumnRef::Dynamic(other.clone())),
    }
}

/// Convenience wrapper: the column a node refers to, if any.
pub fn column_ref(expr: &ExprAst) -> Result<Option<ColumnRef>, CompileError> {
    match classify(expr)? {
        Classification::Column(column) => Ok(Some(column)),
        _ => Ok(None),
    }
}

/// Column references reachable from `expr` in first-occurrence order.
///
/// Descent stops at column references, escapes and qualified paths. With
/// `unique` set, structurally equal references are kept once.
pub fn collect_columns(expr: &ExprAst, unique: bool) -> Result<Vec<ColumnRef>, CompileError> {
    let mut out = Vec::new();
    collect_into(expr, unique, &mut out)?;
    Ok(out)
}

fn collect_into(
    expr: &ExprAst,
    unique: bool,
    out: &mut Vec<ColumnRef>,
) -> Result<(), CompileError> {
    match classify(expr)? {
        Classification::Column(column) => {
            if !unique || !out.contains(&column) {
                out.push(column);
            }
        }
        Classification::Escaped | Classification::Qualified => {}
        Classification::Computation => {
            if let ExprAst::Assign { value, .. } = expr {
                // Assignment targets inside a body are locals, not columns.
                return collect_into(value, unique, out);
            }
            for child in expr.children() {
                collect_into(child, unique, out)?;
            }
        }
    }
    Ok(())
}
