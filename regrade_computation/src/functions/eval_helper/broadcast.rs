//! Element-wise application of operators to arrays.
//!
//! A scalar combined with an array is applied to every element. Two arrays must have the same
//! length and are combined pairwise. Nesting is handled recursively.

use super::expect_arity;
use crate::{Arity, EvalErrorKind, Value};

pub fn eval_two_arity_broadcast<F>(args: Vec<Value>, eval_scalar: F) -> Result<Value, EvalErrorKind>
where
    F: Fn(&Value, &Value) -> Result<Value, EvalErrorKind>,
{
    expect_arity(&args, Arity::Two)?;

    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(left), Some(right)) => broadcast(&left, &right, &eval_scalar),
        _ => Err(EvalErrorKind::InvalidParameterLength(Arity::Two, 0)),
    }
}

pub fn eval_one_arity_broadcast<F>(args: Vec<Value>, eval_scalar: F) -> Result<Value, EvalErrorKind>
where
    F: Fn(&Value) -> Result<Value, EvalErrorKind>,
{
    expect_arity(&args, Arity::One)?;

    match args.into_iter().next() {
        Some(value) => map(&value, &eval_scalar),
        None => Err(EvalErrorKind::InvalidParameterLength(Arity::One, 0)),
    }
}

fn map<F>(value: &Value, eval_scalar: &F) -> Result<Value, EvalErrorKind>
where
    F: Fn(&Value) -> Result<Value, EvalErrorKind>,
{
    match value {
        Value::Array(values) => values
            .iter()
            .map(|value| map(value, eval_scalar))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        value => eval_scalar(value),
    }
}

// Left and right matter here, as not every operation is commutative, e.g. divide or subtract.
fn broadcast<F>(left: &Value, right: &Value, eval_scalar: &F) -> Result<Value, EvalErrorKind>
where
    F: Fn(&Value, &Value) -> Result<Value, EvalErrorKind>,
{
    let combined = match (left, right) {
        (Value::Array(lefts), Value::Array(rights)) => {
            if lefts.len() != rights.len() {
                return Err(EvalErrorKind::DimensionMismatch(lefts.len(), rights.len()));
            }

            lefts
                .iter()
                .zip(rights.iter())
                .map(|(left, right)| broadcast(left, right, eval_scalar))
                .collect::<Result<Vec<_>, _>>()?
        }
        (Value::Array(lefts), right) => lefts
            .iter()
            .map(|left| broadcast(left, right, eval_scalar))
            .collect::<Result<Vec<_>, _>>()?,
        (left, Value::Array(rights)) => rights
            .iter()
            .map(|right| broadcast(left, right, eval_scalar))
            .collect::<Result<Vec<_>, _>>()?,
        (left, right) => return eval_scalar(left, right),
    };

    Ok(Value::Array(combined))
}
