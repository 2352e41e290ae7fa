use super::eval_helper::broadcast::{eval_one_arity_broadcast, eval_two_arity_broadcast};
use super::eval_helper::numeric;
use crate::{EvalErrorKind, Interpreter, Value};

fn eval_add(first: f64, second: f64) -> Result<f64, EvalErrorKind> {
    Ok(first + second)
}

fn eval_subtract(first: f64, second: f64) -> Result<f64, EvalErrorKind> {
    Ok(first - second)
}

fn eval_multiply(first: f64, second: f64) -> Result<f64, EvalErrorKind> {
    Ok(first * second)
}

fn eval_divide(first: f64, second: f64) -> Result<f64, EvalErrorKind> {
    if second == 0.0 {
        return Err(EvalErrorKind::DivisionByZero);
    }

    Ok(first / second)
}

fn eval_pow(first: f64, second: f64) -> Result<f64, EvalErrorKind> {
    Ok(first.powf(second))
}

pub fn add(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        numeric::eval_numeric(fn_name, left, right, eval_add)
    })
}

pub fn subtract(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        numeric::eval_numeric(fn_name, left, right, eval_subtract)
    })
}

pub fn multiply(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        numeric::eval_numeric(fn_name, left, right, eval_multiply)
    })
}

pub fn divide(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        numeric::eval_numeric(fn_name, left, right, eval_divide)
    })
}

pub fn pow(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_two_arity_broadcast(args, |left, right| {
        numeric::eval_numeric(fn_name, left, right, eval_pow)
    })
}

pub fn unary_minus(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    eval_one_arity_broadcast(args, |value| {
        numeric::eval_numeric_unary(fn_name, value, |num| -num)
    })
}

#[cfg(test)]
mod tests {
    use crate::test_utils::eval_formula;
    use crate::{EvalErrorKind, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_precedence_through_built_ins() {
        assert_eq!(eval_formula("1 + 2 * 3 - 4 / 2"), Ok(Value::Number(5.0)));
        assert_eq!(eval_formula("-2 ^ 2"), Ok(Value::Number(-4.0)));
        assert_eq!(eval_formula("2 ^ 3 ^ 2"), Ok(Value::Number(512.0)));
    }

    #[test]
    fn test_undefined_propagates() {
        assert_eq!(eval_formula("undefined + 1"), Ok(Value::Undefined));
        assert_eq!(eval_formula("-undefined"), Ok(Value::Undefined));
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(eval_formula("1 / 0"), Err(EvalErrorKind::DivisionByZero));
    }

    #[test]
    fn test_array_broadcast() {
        assert_eq!(
            eval_formula("[1, 2, 3] * 10"),
            Ok(Value::Array(vec![
                Value::Number(10.0),
                Value::Number(20.0),
                Value::Number(30.0)
            ]))
        );
    }

    #[test]
    fn test_strings_are_not_numbers() {
        assert_eq!(
            eval_formula("\"abc\" + 1"),
            Err(EvalErrorKind::InvalidType("add".into(), "string".into()))
        );
        assert_eq!(eval_formula("'2' * 3"), Ok(Value::Number(6.0)));
    }
}
