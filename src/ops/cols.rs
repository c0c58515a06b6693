use crate::error::{BindError, EvalError};
use crate::ops::invalid;
use crate::types::{Selector, Value};

/// Selector arguments accept the same plain values as column resolution.
fn to_selector(name: &str, value: &Value) -> Result<Selector, EvalError> {
    Selector::from_value(value).map_err(|err| match err {
        BindError::InvalidSelector { kind } => EvalError::InvalidArgument {
            name: name.to_string(),
            kind,
        },
        _ => invalid(name, value),
    })
}

pub(super) fn all(_args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Selector(Selector::All))
}

pub(super) fn between(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Selector(Selector::Between(
        Box::new(to_selector("Between", &args[0])?),
        Box::new(to_selector("Between", &args[1])?),
    )))
}

pub(super) fn not(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Selector(Selector::Not(Box::new(to_selector(
        "Not", &args[0],
    )?))))
}

pub(super) fn cols(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Selector(Selector::Cols(
        args.iter()
            .map(|arg| to_selector("Cols", arg))
            .collect::<Result<Vec<_>, _>>()?,
    )))
}
