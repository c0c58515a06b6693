use crate::error::EvalError;
use crate::ops::invalid;
use crate::types::Value;

/// Concatenates the display form of every argument.
pub(super) fn string(args: &[Value]) -> Result<Value, EvalError> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.to_string());
    }
    Ok(Value::Str(out))
}

fn map_text(name: &str, value: &Value, f: fn(&str) -> String) -> Result<Value, EvalError> {
    match value {
        Value::Str(s) | Value::Symbol(s) => Ok(Value::Str(f(s))),
        Value::Missing => Ok(Value::Missing),
        Value::List(items) => items
            .iter()
            .map(|item| map_text(name, item, f))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        other => Err(invalid(name, other)),
    }
}

pub(super) fn uppercase(args: &[Value]) -> Result<Value, EvalError> {
    map_text("uppercase", &args[0], str::to_uppercase)
}

pub(super) fn lowercase(args: &[Value]) -> Result<Value, EvalError> {
    map_text("lowercase", &args[0], str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concatenates_mixed_values() {
        assert_eq!(
            string(&[Value::str("x"), Value::Int(2), Value::Symbol("y".to_string())])
                .expect("string"),
            Value::str("x2y")
        );
    }

    #[test]
    fn case_mapping_passes_missing_through() {
        assert_eq!(uppercase(&[Value::str("ab")]).expect("upper"), Value::str("AB"));
        assert_eq!(lowercase(&[Value::Missing]).expect("lower"), Value::Missing);
        assert!(uppercase(&[Value::Int(1)]).is_err());
    }
}
