use super::eval_helper::{expect_arity, flatten_args, invalid_type};
use crate::{Arity, EvalErrorKind, Interpreter, Value};

/// `countif(values, predicate)`. The predicate runs in the same context as the formula, so it
/// may itself read dependencies.
pub fn eval(
    fn_name: &str,
    interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::Two)?;

    let mut args = args.into_iter();
    let values = args.next().map(Value::into_elements).unwrap_or_default();
    let predicate = match args.next() {
        Some(Value::Function(predicate)) => predicate,
        Some(other) => return Err(invalid_type(fn_name, &other)),
        None => return Err(EvalErrorKind::InvalidParameterLength(Arity::Two, 1)),
    };

    let mut count = 0;
    for value in flatten_args(values) {
        if interpreter.apply(&predicate, vec![value])?.is_truthy() {
            count += 1;
        }
    }

    Ok(Value::Number(count as f64))
}
