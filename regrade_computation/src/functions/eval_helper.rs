//! Shared argument handling for the built-ins.

pub mod broadcast;
pub mod numeric;

use crate::{Arity, EvalErrorKind, Value};

pub fn expect_arity(args: &[Value], arity: Arity) -> Result<(), EvalErrorKind> {
    let accepted = match arity {
        Arity::One => args.len() == 1,
        Arity::Two => args.len() == 2,
        Arity::OneOrTwo => args.len() == 1 || args.len() == 2,
        Arity::OneOrMore => !args.is_empty(),
        Arity::Exactly(n) => args.len() == n,
    };

    if accepted {
        Ok(())
    } else {
        Err(EvalErrorKind::InvalidParameterLength(arity, args.len()))
    }
}

/// Aggregates accept either one array or the values as separate arguments. Nested arrays are
/// flattened.
pub fn flatten_args(args: Vec<Value>) -> Vec<Value> {
    let mut flattened = vec![];
    for arg in args {
        push_flattened(arg, &mut flattened);
    }
    flattened
}

fn push_flattened(value: Value, into: &mut Vec<Value>) {
    match value {
        Value::Array(values) => {
            for value in values {
                push_flattened(value, into);
            }
        }
        value => into.push(value),
    }
}

pub fn invalid_type(fn_name: &str, value: &Value) -> EvalErrorKind {
    EvalErrorKind::InvalidType(fn_name.to_string(), value.type_name().to_string())
}
