use crate::error::EvalError;
use crate::ops::invalid;
use crate::types::Value;

/// Elements of a reduction argument: a column (list) or an aggregate group (tuple).
fn elements<'a>(name: &str, value: &'a Value) -> Result<&'a [Value], EvalError> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items),
        other => Err(invalid(name, other)),
    }
}

/// Numeric elements, or `None` when any element is missing.
fn numbers(name: &str, items: &[Value]) -> Result<Option<Vec<f64>>, EvalError> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Missing => return Ok(None),
            Value::Int(_) | Value::Float(_) => out.push(item.as_f64().unwrap_or(f64::NAN)),
            other => return Err(invalid(name, other)),
        }
    }
    Ok(Some(out))
}

fn all_ints(items: &[Value]) -> bool {
    items.iter().all(|v| matches!(v, Value::Int(_)))
}

pub(super) fn sum(args: &[Value]) -> Result<Value, EvalError> {
    let items = elements("sum", &args[0])?;
    if all_ints(items) {
        let total = items.iter().try_fold(0i64, |acc, v| match v {
            Value::Int(i) => acc.checked_add(*i),
            _ => None,
        });
        if let Some(total) = total {
            return Ok(Value::Int(total));
        }
    }
    Ok(match numbers("sum", items)? {
        Some(xs) => Value::Float(xs.iter().sum()),
        None => Value::Missing,
    })
}

pub(super) fn mean(args: &[Value]) -> Result<Value, EvalError> {
    let items = elements("mean", &args[0])?;
    Ok(match numbers("mean", items)? {
        Some(xs) if xs.is_empty() => Value::Float(f64::NAN),
        Some(xs) => Value::Float(xs.iter().sum::<f64>() / xs.len() as f64),
        None => Value::Missing,
    })
}

fn extremum(name: &str, args: &[Value], pick_max: bool) -> Result<Value, EvalError> {
    let items = elements(name, &args[0])?;
    if items.is_empty() {
        return Err(invalid(name, &args[0]));
    }
    if numbers(name, items)?.is_none() {
        return Ok(Value::Missing);
    }
    let mut best = &items[0];
    for item in &items[1..] {
        let (a, b) = (item.as_f64(), best.as_f64());
        let better = match (a, b) {
            (Some(a), Some(b)) if pick_max => a > b,
            (Some(a), Some(b)) => a < b,
            _ => false,
        };
        if better {
            best = item;
        }
    }
    Ok(best.clone())
}

pub(super) fn maximum(args: &[Value]) -> Result<Value, EvalError> {
    extremum("maximum", args, true)
}

pub(super) fn minimum(args: &[Value]) -> Result<Value, EvalError> {
    extremum("minimum", args, false)
}

pub(super) fn length(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Str(s) | Value::Symbol(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Ok(Value::Int(elements("length", other)?.len() as i64)),
    }
}

pub(super) fn first(args: &[Value]) -> Result<Value, EvalError> {
    elements("first", &args[0])?
        .first()
        .cloned()
        .ok_or_else(|| invalid("first", &args[0]))
}

pub(super) fn last(args: &[Value]) -> Result<Value, EvalError> {
    elements("last", &args[0])?
        .last()
        .cloned()
        .ok_or_else(|| invalid("last", &args[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(items: &[i64]) -> Value {
        Value::List(items.iter().map(|v| Value::Int(*v)).collect())
    }

    #[test]
    fn sum_keeps_integers_and_propagates_missing() {
        assert_eq!(sum(&[ints(&[1, 2, 3])]).expect("sum"), Value::Int(6));
        assert_eq!(
            sum(&[Value::Tuple(vec![Value::Int(1), Value::Float(0.5)])]).expect("sum"),
            Value::Float(1.5)
        );
        assert_eq!(
            sum(&[Value::List(vec![Value::Int(1), Value::Missing])]).expect("sum"),
            Value::Missing
        );
    }

    #[test]
    fn mean_and_extrema() {
        assert_eq!(mean(&[ints(&[1, 2])]).expect("mean"), Value::Float(1.5));
        assert_eq!(maximum(&[ints(&[3, 9, 2])]).expect("maximum"), Value::Int(9));
        assert_eq!(minimum(&[ints(&[3, 9, 2])]).expect("minimum"), Value::Int(2));
        assert!(maximum(&[ints(&[])]).is_err());
    }

    #[test]
    fn length_first_last() {
        assert_eq!(length(&[ints(&[4, 5])]).expect("length"), Value::Int(2));
        assert_eq!(length(&[Value::str("abc")]).expect("length"), Value::Int(3));
        assert_eq!(first(&[ints(&[4, 5])]).expect("first"), Value::Int(4));
        assert_eq!(last(&[ints(&[4, 5])]).expect("last"), Value::Int(5));
        assert!(matches!(
            first(&[Value::Int(1)]),
            Err(EvalError::InvalidArgument { kind: "int", .. })
        ));
    }
}
