use super::eval_helper::broadcast::eval_two_arity_broadcast;
use super::eval_helper::numeric::{is_absent, ValuePartialOrd};
use crate::{EvalErrorKind, Interpreter, Value};
use std::cmp::Ordering;

fn eval_equality(left: &Value, right: &Value, want_equal: bool) -> Result<Value, EvalErrorKind> {
    if is_absent(left) || is_absent(right) {
        return Ok(Value::Undefined);
    }

    // Values of unrelated types are simply unequal.
    let equal = left.partial_cmp(right) == Some(Ordering::Equal);
    Ok(Value::Bool(equal == want_equal))
}

fn eval_ordering(
    fn_name: &str,
    left: &Value,
    right: &Value,
    accept: fn(Ordering) -> bool,
) -> Result<Value, EvalErrorKind> {
    if is_absent(left) || is_absent(right) {
        return Ok(Value::Undefined);
    }

    match left.partial_cmp(right) {
        Some(ordering) => Ok(Value::Bool(accept(ordering))),
        None => Err(EvalErrorKind::InvalidType(
            fn_name.to_string(),
            format!("{} and {}", left.type_name(), right.type_name()),
        )),
    }
}

pub fn equal(
    _fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| eval_equality(left, right, true))
}

pub fn unequal(
    _fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| eval_equality(left, right, false))
}

pub fn larger(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        eval_ordering(fn_name, left, right, |ordering| ordering == Ordering::Greater)
    })
}

pub fn larger_eq(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        eval_ordering(fn_name, left, right, |ordering| ordering != Ordering::Less)
    })
}

pub fn smaller(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        eval_ordering(fn_name, left, right, |ordering| ordering == Ordering::Less)
    })
}

pub fn smaller_eq(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        eval_ordering(fn_name, left, right, |ordering| ordering != Ordering::Greater)
    })
}
