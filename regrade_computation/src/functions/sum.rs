use super::eval_helper::{expect_arity, flatten_args};
use crate::{Arity, EvalErrorKind, Interpreter, Value};

/// `sum(values)` or `sum(a, b, ...)`. Skips absent entries; any entry that is neither a number
/// nor a cell makes the whole sum `Undefined`, as does having nothing left to add.
pub fn eval(
    _fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::OneOrMore)?;

    let mut acc = None;

    for value in flatten_args(args) {
        let num = match value {
            Value::Undefined => None,
            Value::Number(num) => Some(num),
            Value::Cell(cell) => cell.effective_score(),
            _ => return Ok(Value::Undefined),
        };

        if let Some(num) = num {
            acc = Some(acc.unwrap_or(0.0) + num);
        }
    }

    Ok(acc.into())
}
