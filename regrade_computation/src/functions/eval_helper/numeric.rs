use super::invalid_type;
use crate::{EvalErrorKind, Value};
use std::cmp::Ordering;

/// Reads a value as a number. Cells read as their effective score, booleans as 1 or 0, and
/// numeric strings are parsed. `None` means the value is absent and should propagate.
pub fn to_number(fn_name: &str, value: &Value) -> Result<Option<f64>, EvalErrorKind> {
    match value {
        Value::Undefined => Ok(None),
        Value::Number(num) => Ok(Some(*num)),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::Cell(cell) => Ok(cell.effective_score()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid_type(fn_name, value)),
        Value::Array(_) | Value::Function(_) => Err(invalid_type(fn_name, value)),
    }
}

/// Applies a binary numeric operation, propagating absent operands as `Undefined`.
pub fn eval_numeric(
    fn_name: &str,
    left: &Value,
    right: &Value,
    op: fn(f64, f64) -> Result<f64, EvalErrorKind>,
) -> Result<Value, EvalErrorKind> {
    match (to_number(fn_name, left)?, to_number(fn_name, right)?) {
        (Some(left), Some(right)) => op(left, right).map(Value::Number),
        _ => Ok(Value::Undefined),
    }
}

pub fn eval_numeric_unary(
    fn_name: &str,
    value: &Value,
    op: fn(f64) -> f64,
) -> Result<Value, EvalErrorKind> {
    Ok(to_number(fn_name, value)?.map(op).into())
}

/// A trait that has the same API as PartialOrd, just used for evaluating values.
pub trait ValuePartialOrd {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering>;
}

impl ValuePartialOrd for Value {
    fn partial_cmp(&self, rhs: &Value) -> Option<Ordering> {
        match (self, rhs) {
            (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
            (Value::String(_), _) | (_, Value::String(_)) => None,
            _ => match (to_number("", self), to_number("", rhs)) {
                (Ok(Some(left)), Ok(Some(right))) => left.partial_cmp(&right),
                _ => None,
            },
        }
    }
}

/// Whether a value has nothing to compare or compute with.
pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Undefined => true,
        Value::Cell(cell) => cell.effective_score().is_none(),
        _ => false,
    }
}
