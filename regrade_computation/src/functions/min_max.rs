use super::eval_helper::{expect_arity, flatten_args, numeric};
use crate::{Arity, EvalErrorKind, Interpreter, Value};

fn eval_fold(
    fn_name: &str,
    args: Vec<Value>,
    pick: fn(f64, f64) -> f64,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::OneOrMore)?;

    let mut acc: Option<f64> = None;
    for value in flatten_args(args) {
        match numeric::to_number(fn_name, &value)? {
            Some(num) => acc = Some(acc.map_or(num, |acc| pick(acc, num))),
            None => return Ok(Value::Undefined),
        }
    }

    Ok(acc.into())
}

pub fn min(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_fold(fn_name, args, f64::min)
}

pub fn max(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_fold(fn_name, args, f64::max)
}
