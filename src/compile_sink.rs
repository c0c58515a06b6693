use crate::compile_expr::{BraceKind, ExprAst};
use crate::error::{BindError, CompileError};
use crate::plan::{NameTemplate, SinkDescriptor, TemplatePart};
use crate::runtime::Runtime;
use crate::types::Value;

/// Derives the sink descriptor of a formula from its optional explicit target.
pub fn resolve_sink(target: Option<&ExprAst>, astable: bool) -> Result<SinkDescriptor, CompileError> {
    let Some(target) = target else {
        return Ok(if astable {
            SinkDescriptor::ExpandRecord
        } else {
            SinkDescriptor::Default
        });
    };
    if astable {
        return Err(CompileError::AstableTargetConflict {
            target: target.to_string(),
        });
    }
    match target {
        ExprAst::Symbol(name) => Ok(SinkDescriptor::Static(vec![name.clone()])),
        ExprAst::Str(text) => string_sink(target, text),
        ExprAst::Dollar(inner) => match inner.as_ref() {
            ExprAst::Symbol(name) => Ok(SinkDescriptor::Static(vec![name.clone()])),
            ExprAst::Str(text) => string_sink(target, text),
            _ => expression_sink(target),
        },
        ExprAst::List(items) | ExprAst::Tuple(items) => match static_names(items) {
            Some(names) => Ok(SinkDescriptor::Static(names)),
            None => expression_sink(target),
        },
        _ => expression_sink(target),
    }
}

fn string_sink(target: &ExprAst, text: &str) -> Result<SinkDescriptor, CompileError> {
    let parts = parse_template(text).map_err(|reason| CompileError::InvalidTarget {
        target: target.to_string(),
        reason,
    })?;
    if parts.iter().any(|p| matches!(p, TemplatePart::Index(_))) {
        Ok(SinkDescriptor::Template(NameTemplate::Interpolated(parts)))
    } else {
        Ok(SinkDescriptor::Static(vec![text.to_string()]))
    }
}

fn static_names(items: &[ExprAst]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|item| match item {
            ExprAst::Symbol(name) => Some(name.clone()),
            ExprAst::Str(name) if !has_placeholder(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn has_placeholder(text: &str) -> bool {
    matches!(parse_template(text), Ok(parts) if parts.iter().any(|p| matches!(p, TemplatePart::Index(_))))
}

/// Splits a string on `{}` / `{n}` placeholders. `{}` means index 1.
///
/// Braces not enclosing an (optional) integer are kept as text.
pub fn parse_template(text: &str) -> Result<Vec<TemplatePart>, String> {
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        buf.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits_len = after.bytes().take_while(u8::is_ascii_digit).count();
        if after[digits_len..].starts_with('}') {
            let index = if digits_len == 0 {
                1
            } else {
                after[..digits_len]
                    .parse::<usize>()
                    .map_err(|e| format!("invalid placeholder index: {e}"))?
            };
            if index == 0 {
                return Err("placeholder indices are 1-based, got {0}".to_string());
            }
            if !buf.is_empty() {
                parts.push(TemplatePart::Text(std::mem::take(&mut buf)));
            }
            parts.push(TemplatePart::Index(index));
            rest = &after[digits_len + 1..];
        } else {
            buf.push('{');
            rest = after;
        }
    }
    buf.push_str(rest);
    if !buf.is_empty() {
        parts.push(TemplatePart::Text(buf));
    }
    Ok(parts)
}

fn expression_sink(target: &ExprAst) -> Result<SinkDescriptor, CompileError> {
    let mut max_index = 0;
    let body = lower_placeholders(target, target, &mut max_index)?;
    Ok(SinkDescriptor::Template(NameTemplate::Expression { body, max_index }))
}

fn lower_placeholders(
    root: &ExprAst,
    expr: &ExprAst,
    max_index: &mut usize,
) -> Result<ExprAst, CompileError> {
    let invalid = |reason: String| CompileError::InvalidTarget {
        target: root.to_string(),
        reason,
    };
    match expr {
        ExprAst::Braced {
            kind: BraceKind::Single,
            inner,
        } => {
            let index = match inner.as_deref() {
                None => 1,
                Some(ExprAst::Integer(n)) if *n >= 1 => *n as usize,
                Some(other) => {
                    return Err(invalid(format!(
                        "`{{{other}}}` is not a name placeholder; use `{{}}` or `{{n}}` with n >= 1"
                    )))
                }
            };
            *max_index = (*max_index).max(index);
            Ok(ExprAst::Param(index - 1))
        }
        ExprAst::Braced { .. } => Err(invalid(
            "multi-column references cannot appear in an output name".to_string(),
        )),
        ExprAst::Str(text) => {
            let parts = parse_template(text).map_err(invalid)?;
            if !parts.iter().any(|p| matches!(p, TemplatePart::Index(_))) {
                return Ok(expr.clone());
            }
            let args = parts
                .into_iter()
                .map(|part| match part {
                    TemplatePart::Text(text) => ExprAst::Str(text),
                    TemplatePart::Index(index) => {
                        *max_index = (*max_index).max(index);
                        ExprAst::Param(index - 1)
                    }
                })
                .collect();
            Ok(ExprAst::call("string", args))
        }
        ExprAst::Dollar(inner) => lower_placeholders(root, inner, max_index),
        ExprAst::Escape(payload) => Ok(payload.as_ref().clone()),
        _ => expr.try_map_children(|child| lower_placeholders(root, child, max_index)),
    }
}

/// Applies a name template to the resolved source column names of one
/// invocation.
pub fn apply_template(
    template: &NameTemplate,
    names: &[String],
    runtime: &Runtime,
) -> Result<String, BindError> {
    let max_index = template.max_index();
    if max_index > names.len() {
        return Err(BindError::InvalidStringIndex {
            index: max_index,
            count: names.len(),
            names: names.to_vec(),
        });
    }
    match template {
        NameTemplate::Interpolated(parts) => Ok(parts
            .iter()
            .map(|part| match part {
                TemplatePart::Text(text) => text.as_str(),
                TemplatePart::Index(index) => names[index - 1].as_str(),
            })
            .collect()),
        NameTemplate::Expression { body, .. } => {
            let params: Vec<Value> = names.iter().map(|n| Value::str(n.as_str())).collect();
            match runtime.eval(body, &params)? {
                Value::Str(name) | Value::Symbol(name) => Ok(name),
                other => Err(BindError::NonStringName { kind: other.kind() }),
            }
        }
    }
}
