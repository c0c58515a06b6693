use crate::error::EvalError;
use crate::ops::invalid;
use crate::types::Value;

/// Lifts a scalar binary kernel over lists. A scalar operand is repeated
/// against every element of a list operand; missing on either side yields
/// missing.
fn lift2(
    op: &str,
    lhs: &Value,
    rhs: &Value,
    kernel: fn(&str, &Value, &Value) -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::List(a), Value::List(b)) => {
            if a.len() != b.len() {
                return Err(EvalError::LengthMismatch {
                    lhs: a.len(),
                    rhs: b.len(),
                });
            }
            a.iter()
                .zip(b)
                .map(|(x, y)| lift2(op, x, y, kernel))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        (Value::List(a), scalar) => a
            .iter()
            .map(|x| lift2(op, x, scalar, kernel))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (scalar, Value::List(b)) => b
            .iter()
            .map(|y| lift2(op, scalar, y, kernel))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (Value::Missing, _) | (_, Value::Missing) => Ok(Value::Missing),
        _ => kernel(op, lhs, rhs),
    }
}

fn lift1(
    name: &str,
    value: &Value,
    kernel: fn(&str, &Value) -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|x| lift1(name, x, kernel))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Missing => Ok(Value::Missing),
        other => kernel(name, other),
    }
}

fn mismatch(op: &str, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.to_string(),
        lhs: lhs.kind(),
        rhs: rhs.kind(),
    }
}

fn arith(op: &str, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        let out = match op {
            "+" => a.checked_add(*b),
            "-" => a.checked_sub(*b),
            "*" => a.checked_mul(*b),
            "min" => Some(*a.min(b)),
            "max" => Some(*a.max(b)),
            _ => None,
        };
        if let Some(out) = out {
            return Ok(Value::Int(out));
        }
    }
    let (Some(a), Some(b)) = (number(lhs), number(rhs)) else {
        return Err(mismatch(op, lhs, rhs));
    };
    let out = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "min" => a.min(b),
        "max" => a.max(b),
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    Ok(Value::Float(out))
}

/// Numeric view excluding booleans.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<&str> {
    match value {
        Value::Str(s) | Value::Symbol(s) => Some(s),
        _ => None,
    }
}

fn compare(op: &str, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let ordering = if let (Some(a), Some(b)) = (number(lhs), number(rhs)) {
        a.partial_cmp(&b)
    } else if let (Some(a), Some(b)) = (text(lhs), text(rhs)) {
        Some(a.cmp(b))
    } else if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        Some(a.cmp(b))
    } else {
        return Err(mismatch(op, lhs, rhs));
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let out = match op {
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        ">=" => ordering.is_ge(),
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    Ok(Value::Bool(out))
}

fn equality(op: &str, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let equal = match (number(lhs), number(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    };
    Ok(Value::Bool(if op == "==" { equal } else { !equal }))
}

fn logic(op: &str, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == "&" { *a && *b } else { *a || *b })),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

pub(super) fn add(args: &[Value]) -> Result<Value, EvalError> {
    lift2("+", &args[0], &args[1], arith)
}

pub(super) fn sub(args: &[Value]) -> Result<Value, EvalError> {
    lift2("-", &args[0], &args[1], arith)
}

pub(super) fn mul(args: &[Value]) -> Result<Value, EvalError> {
    lift2("*", &args[0], &args[1], arith)
}

pub(super) fn div(args: &[Value]) -> Result<Value, EvalError> {
    lift2("/", &args[0], &args[1], arith)
}

pub(super) fn min(args: &[Value]) -> Result<Value, EvalError> {
    lift2("min", &args[0], &args[1], arith)
}

pub(super) fn max(args: &[Value]) -> Result<Value, EvalError> {
    lift2("max", &args[0], &args[1], arith)
}

pub(super) fn lt(args: &[Value]) -> Result<Value, EvalError> {
    lift2("<", &args[0], &args[1], compare)
}

pub(super) fn le(args: &[Value]) -> Result<Value, EvalError> {
    lift2("<=", &args[0], &args[1], compare)
}

pub(super) fn gt(args: &[Value]) -> Result<Value, EvalError> {
    lift2(">", &args[0], &args[1], compare)
}

pub(super) fn ge(args: &[Value]) -> Result<Value, EvalError> {
    lift2(">=", &args[0], &args[1], compare)
}

pub(super) fn eq(args: &[Value]) -> Result<Value, EvalError> {
    lift2("==", &args[0], &args[1], equality)
}

pub(super) fn ne(args: &[Value]) -> Result<Value, EvalError> {
    lift2("!=", &args[0], &args[1], equality)
}

pub(super) fn and(args: &[Value]) -> Result<Value, EvalError> {
    lift2("&", &args[0], &args[1], logic)
}

pub(super) fn or(args: &[Value]) -> Result<Value, EvalError> {
    lift2("|", &args[0], &args[1], logic)
}

pub(super) fn not(args: &[Value]) -> Result<Value, EvalError> {
    lift1("~", &args[0], |name, v| match v {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(invalid(name, other)),
    })
}

pub(super) fn neg(args: &[Value]) -> Result<Value, EvalError> {
    lift1("neg", &args[0], |name, v| match v {
        Value::Int(i) => Ok(i
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(*i as f64)))),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(invalid(name, other)),
    })
}

pub(super) fn pos(args: &[Value]) -> Result<Value, EvalError> {
    lift1("pos", &args[0], |name, v| match v {
        Value::Int(_) | Value::Float(_) => Ok(v.clone()),
        other => Err(invalid(name, other)),
    })
}

fn float_fn(name: &str, value: &Value) -> Result<Value, EvalError> {
    let x = number(value).ok_or_else(|| invalid(name, value))?;
    let out = match name {
        "sqrt" => x.sqrt(),
        "exp" => x.exp(),
        "log" => x.ln(),
        _ => return Err(invalid(name, value)),
    };
    Ok(Value::Float(out))
}

pub(super) fn abs(args: &[Value]) -> Result<Value, EvalError> {
    lift1("abs", &args[0], |name, v| match v {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(invalid(name, other)),
    })
}

pub(super) fn sqrt(args: &[Value]) -> Result<Value, EvalError> {
    lift1("sqrt", &args[0], float_fn)
}

pub(super) fn exp(args: &[Value]) -> Result<Value, EvalError> {
    lift1("exp", &args[0], float_fn)
}

pub(super) fn log(args: &[Value]) -> Result<Value, EvalError> {
    lift1("log", &args[0], float_fn)
}

pub(super) fn ifelse(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Bool(true) => Ok(args[1].clone()),
        Value::Bool(false) => Ok(args[2].clone()),
        Value::Missing => Ok(Value::Missing),
        Value::List(conds) => conds
            .iter()
            .enumerate()
            .map(|(idx, cond)| {
                let pick = |v: &Value| match v {
                    Value::List(items) => items.get(idx).cloned().ok_or(EvalError::LengthMismatch {
                        lhs: conds.len(),
                        rhs: items.len(),
                    }),
                    scalar => Ok(scalar.clone()),
                };
                ifelse(&[cond.clone(), pick(&args[1])?, pick(&args[2])?])
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        other => Err(invalid("ifelse", other)),
    }
}

pub(super) fn tuple(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Tuple(args.to_vec()))
}

pub(super) fn identity(args: &[Value]) -> Result<Value, EvalError> {
    Ok(args[0].clone())
}

pub(super) fn ismissing(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(args[0].is_missing()))
}

pub(super) fn coalesce(args: &[Value]) -> Result<Value, EvalError> {
    Ok(args
        .iter()
        .find(|v| !v.is_missing())
        .cloned()
        .unwrap_or(Value::Missing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[i64]) -> Value {
        Value::List(items.iter().map(|v| Value::Int(*v)).collect())
    }

    #[test]
    fn integer_arithmetic_stays_integral_except_division() {
        assert_eq!(add(&[Value::Int(2), Value::Int(3)]).expect("add"), Value::Int(5));
        assert_eq!(
            div(&[Value::Int(3), Value::Int(2)]).expect("div"),
            Value::Float(1.5)
        );
        assert_eq!(
            mul(&[Value::Int(2), Value::Float(0.5)]).expect("mul"),
            Value::Float(1.0)
        );
    }

    #[test]
    fn lists_are_lifted_elementwise_with_scalar_broadcast() {
        assert_eq!(add(&[list(&[1, 2]), list(&[10, 20])]).expect("add"), list(&[11, 22]));
        assert_eq!(sub(&[list(&[1, 2]), Value::Int(1)]).expect("sub"), list(&[0, 1]));
        assert!(matches!(
            add(&[list(&[1, 2]), list(&[1])]),
            Err(EvalError::LengthMismatch { lhs: 2, rhs: 1 })
        ));
    }

    #[test]
    fn missing_propagates_through_operators() {
        assert_eq!(add(&[Value::Missing, Value::Int(1)]).expect("add"), Value::Missing);
        let mixed = Value::List(vec![Value::Int(1), Value::Missing]);
        assert_eq!(
            gt(&[mixed, Value::Int(0)]).expect("gt"),
            Value::List(vec![Value::Bool(true), Value::Missing])
        );
        assert_eq!(
            coalesce(&[Value::Missing, Value::Int(7)]).expect("coalesce"),
            Value::Int(7)
        );
    }

    #[test]
    fn type_mismatch_names_operator_and_kinds() {
        let err = add(&[Value::str("a"), Value::Int(1)]).expect_err("string + int");
        assert_eq!(err.to_string(), "`+` is not defined for string and int");
        assert_eq!(
            lt(&[Value::str("a"), Value::str("b")]).expect("lt"),
            Value::Bool(true)
        );
    }

    #[test]
    fn ifelse_selects_per_element() {
        let cond = Value::List(vec![Value::Bool(true), Value::Bool(false)]);
        assert_eq!(
            ifelse(&[cond, list(&[1, 2]), Value::Int(0)]).expect("ifelse"),
            list(&[1, 0])
        );
    }

    #[test]
    fn unary_neg_and_pos_keep_integer_results() {
        assert_eq!(neg(&[list(&[1, -2])]).expect("neg"), list(&[-1, 2]));
        assert_eq!(neg(&[Value::Float(0.5)]).expect("neg"), Value::Float(-0.5));
        assert_eq!(
            neg(&[Value::Int(i64::MIN)]).expect("neg"),
            Value::Float(-(i64::MIN as f64))
        );
        assert_eq!(pos(&[Value::Missing]).expect("pos"), Value::Missing);
        assert!(matches!(
            neg(&[Value::str("a")]),
            Err(EvalError::InvalidArgument { kind: "string", .. })
        ));
    }
}
