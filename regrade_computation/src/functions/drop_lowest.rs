use super::eval_helper::{expect_arity, numeric};
use crate::{Arity, EvalErrorKind, Interpreter, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// `drop_lowest(values, n)`
///
/// Drops the `n` lowest-scoring entries that are flagged droppable and returns the rest in their
/// original order. Entries that are not droppable are never dropped, however low. An absent
/// score ranks below every other score; ties keep input order.
pub fn eval(
    fn_name: &str,
    _interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::Two)?;

    let mut args = args.into_iter();
    let values = args.next().map(Value::into_elements).unwrap_or_default();
    let n = match args.next() {
        Some(n) => numeric::to_number(fn_name, &n)?.unwrap_or(0.0).max(0.0) as usize,
        None => 0,
    };

    let mut droppable: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| match value {
            Value::Cell(cell) if cell.is_droppable => Some((
                index,
                cell.effective_score().unwrap_or(f64::NEG_INFINITY),
            )),
            _ => None,
        })
        .collect();

    // Stable sort, so equal scores are dropped in input order.
    droppable.sort_by(|(_, left), (_, right)| left.partial_cmp(right).unwrap_or(Ordering::Equal));

    let dropped: HashSet<usize> = droppable.into_iter().take(n).map(|(index, _)| index).collect();

    Ok(Value::Array(
        values
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !dropped.contains(index))
            .map(|(_, value)| value)
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cell, cell_value, context, with_interpreter};
    use pretty_assertions::assert_eq;

    fn entry(slug: &str, score: Option<f64>, droppable: bool) -> Value {
        let mut cell = cell(slug, score, 20.0);
        cell.is_droppable = droppable;
        cell_value(cell)
    }

    fn drop_lowest(values: Vec<Value>, n: f64) -> Value {
        with_interpreter(&mut context(true), |i| {
            eval("drop_lowest", i, vec![Value::Array(values), Value::Number(n)])
        })
        .unwrap()
    }

    #[test]
    fn lowest_droppable_is_dropped() {
        let result = drop_lowest(
            vec![
                entry("a", Some(5.0), true),
                entry("b", Some(20.0), false),
                entry("c", Some(10.0), true),
            ],
            1.0,
        );

        assert_eq!(
            result,
            Value::Array(vec![entry("b", Some(20.0), false), entry("c", Some(10.0), true)])
        );
    }

    #[test]
    fn non_droppable_entries_are_kept_even_when_lowest() {
        let result = drop_lowest(
            vec![
                entry("a", Some(1.0), false),
                entry("b", Some(10.0), true),
                entry("c", Some(20.0), true),
            ],
            1.0,
        );

        assert_eq!(
            result,
            Value::Array(vec![entry("a", Some(1.0), false), entry("c", Some(20.0), true)])
        );
    }

    #[test]
    fn ties_and_absent_scores() {
        let result = drop_lowest(
            vec![
                entry("a", Some(3.0), true),
                entry("b", None, true),
                entry("c", Some(3.0), true),
            ],
            2.0,
        );

        assert_eq!(result, Value::Array(vec![entry("c", Some(3.0), true)]));
    }

    #[test]
    fn dropping_more_than_available_keeps_the_rest() {
        let result = drop_lowest(
            vec![entry("a", Some(3.0), true), entry("b", Some(4.0), false)],
            5.0,
        );

        assert_eq!(result, Value::Array(vec![entry("b", Some(4.0), false)]));
    }
}
