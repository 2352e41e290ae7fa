use super::eval_helper::{expect_arity, invalid_type};
use crate::{Arity, EvalErrorKind, Interpreter, Value};
use regrade_parser::Expression;

/// `case_when([[condition, value], ...])`, or the pairs as separate arguments. Returns the value
/// of the first pair whose condition is truthy.
pub fn eval(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::OneOrMore)?;

    let nested = matches!(
        args.as_slice(),
        [Value::Array(pairs)] if pairs.iter().all(|pair| matches!(pair, Value::Array(_)))
    );
    let pairs = if nested {
        args.into_iter()
            .next()
            .map(Value::into_elements)
            .unwrap_or_default()
    } else {
        args
    };

    for pair in pairs {
        match pair {
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or(Value::Undefined);
                if pair[0].is_truthy() {
                    return Ok(value);
                }
            }
            other => return Err(invalid_type(fn_name, &other)),
        }
    }

    Ok(Value::Undefined)
}

/// The condition and value of every pair when the call spells them out as array literals.
/// `None` means the shape is only known after evaluation and `eval` has to decide.
pub fn literal_pairs(args: &[Expression]) -> Option<Vec<(&Expression, &Expression)>> {
    let pairs: Vec<&Expression> = match args {
        [Expression::Array(items)]
            if items.iter().all(|item| matches!(item, Expression::Array(_))) =>
        {
            items.iter().collect()
        }
        [_, _, ..] => args.iter().collect(),
        _ => return None,
    };

    pairs
        .into_iter()
        .map(|pair| match pair {
            Expression::Array(pair) if pair.len() == 2 => Some((&pair[0], &pair[1])),
            _ => None,
        })
        .collect()
}

/// Evaluates conditions in order, and only the value of the first truthy one.
pub fn eval_lazy(
    interpreter: &mut Interpreter<'_>,
    pairs: &[(&Expression, &Expression)],
) -> Result<Value, EvalErrorKind> {
    for (condition, value) in pairs {
        if interpreter.eval(condition)?.is_truthy() {
            return interpreter.eval(value);
        }
    }

    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use crate::test_utils::eval_formula;
    use crate::{EvalErrorKind, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn first_truthy_condition_wins() {
        assert_eq!(
            eval_formula("x = 85\ncase_when([[x >= 90, 'A'], [x >= 80, 'B'], [true, 'C']])"),
            Ok(Value::String("B".into()))
        );
        assert_eq!(
            eval_formula("case_when([false, 1], [1, 2])"),
            Ok(Value::Number(2.0))
        );
    }

    #[test]
    fn no_match_is_undefined() {
        assert_eq!(eval_formula("case_when([[false, 1]])"), Ok(Value::Undefined));
    }

    #[test]
    fn only_the_chosen_value_is_evaluated() {
        // Dividing by zero is an error, so the untaken values must never run.
        assert_eq!(
            eval_formula("x = 0\ncase_when([[x == 0, 0], [true, 1 / x]])"),
            Ok(Value::Number(0.0))
        );
        assert_eq!(
            eval_formula("case_when([1 > 2, 1 / 0], [true, 'ok'])"),
            Ok(Value::String("ok".into()))
        );
        // Conditions after the first truthy one are skipped as well.
        assert_eq!(
            eval_formula("case_when([[true, 1], [1 / 0, 2]])"),
            Ok(Value::Number(1.0))
        );
    }

    #[test]
    fn computed_pairs_are_still_accepted() {
        assert_eq!(
            eval_formula("pairs = [[false, 1], [true, 2]]\ncase_when(pairs)"),
            Ok(Value::Number(2.0))
        );
    }

    #[test]
    fn malformed_pair_is_an_error() {
        assert_eq!(
            eval_formula("case_when([[true]])"),
            Err(EvalErrorKind::InvalidType("case_when".into(), "array".into()))
        );
    }
}
