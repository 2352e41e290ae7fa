use super::eval_helper::broadcast::eval_one_arity_broadcast;
use super::eval_helper::{expect_arity, numeric};
use crate::{Arity, EvalErrorKind, Interpreter, Value};

pub fn not(
    _fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_one_arity_broadcast(args, |value| match value {
        Value::Undefined => Ok(Value::Undefined),
        value => Ok(Value::Bool(!value.is_truthy())),
    })
}

/// `round(x, digits = 0)`
pub fn round(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::OneOrTwo)?;

    let digits = match args.get(1) {
        Some(digits) => match numeric::to_number(fn_name, digits)? {
            Some(digits) => digits.trunc() as i32,
            None => return Ok(Value::Undefined),
        },
        None => 0,
    };
    let factor = 10f64.powi(digits);

    Ok(numeric::to_number(fn_name, &args[0])?
        .map(|num| (num * factor).round() / factor)
        .into())
}

pub fn floor(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_one_arity_broadcast(args, |value| {
        numeric::eval_numeric_unary(fn_name, value, f64::floor)
    })
}

pub fn ceil(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_one_arity_broadcast(args, |value| {
        numeric::eval_numeric_unary(fn_name, value, f64::ceil)
    })
}

pub fn abs(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_one_arity_broadcast(args, |value| {
        numeric::eval_numeric_unary(fn_name, value, f64::abs)
    })
}
