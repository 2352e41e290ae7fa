use super::eval_helper::{expect_arity, flatten_args, invalid_type};
use crate::{Arity, EvalErrorKind, Interpreter, Value};
use regrade_storage::IncompleteValuesPolicy;

#[derive(Default)]
struct CellTotals {
    score: f64,
    max_score: f64,
    ratios: Vec<f64>,
    count: usize,
}

/// `mean(values, weighted = true)`
///
/// Averages cells as a percentage of their max score. A cell withheld from the student view is
/// skipped, an excused missing cell is skipped, and a missing cell that was not excused is
/// counted according to the gradebook's incomplete-values policy. Plain numbers are averaged
/// arithmetically. Returns `Undefined` when nothing contributes.
pub fn eval(
    fn_name: &str,
    interpreter: &mut Interpreter<'_>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind> {
    expect_arity(&args, Arity::OneOrTwo)?;

    let mut args = args.into_iter();
    let values = args.next().map(Value::into_elements).unwrap_or_default();
    let weighted = args.next().map_or(true, |weighted| weighted.is_truthy());

    let context = interpreter.context();
    let policy = context.incomplete_values_policy;
    let is_private = context.is_private_calculation;

    let mut numbers = vec![];
    let mut cells = CellTotals::default();

    for value in flatten_args(values) {
        match value {
            Value::Undefined => {}
            Value::Number(num) => numbers.push(num),
            Value::Cell(cell) => {
                if !is_private && !cell.released {
                    continue;
                }

                let max_score = cell.max_score.unwrap_or(0.0);
                let score = match cell.effective_score() {
                    Some(score) if !(cell.is_missing && cell.score_override.is_none()) => score,
                    _ => {
                        if cell.is_excused {
                            continue;
                        }
                        match policy {
                            IncompleteValuesPolicy::AssumeZero => 0.0,
                            IncompleteValuesPolicy::AssumeMax => max_score,
                            IncompleteValuesPolicy::ReportOnly => continue,
                        }
                    }
                };

                cells.score += score;
                cells.max_score += max_score;
                cells.count += 1;
                if max_score > 0.0 {
                    cells.ratios.push(score / max_score);
                }
            }
            other => return Err(invalid_type(fn_name, &other)),
        }
    }

    if cells.count > 0 && !numbers.is_empty() {
        return Err(EvalErrorKind::InvalidType(
            fn_name.to_string(),
            "cells mixed with numbers".to_string(),
        ));
    }

    if !numbers.is_empty() {
        return Ok(Value::Number(
            numbers.iter().sum::<f64>() / numbers.len() as f64,
        ));
    }

    if weighted {
        if cells.max_score > 0.0 {
            return Ok(Value::Number(100.0 * cells.score / cells.max_score));
        }
    } else if !cells.ratios.is_empty() {
        return Ok(Value::Number(
            100.0 * cells.ratios.iter().sum::<f64>() / cells.ratios.len() as f64,
        ));
    }

    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cell, cell_value, context, with_interpreter};
    use crate::ExpressionContext;
    use regrade_storage::ColumnCell;
    use pretty_assertions::assert_eq;

    fn mean_of(context: &mut ExpressionContext, args: Vec<Value>) -> Value {
        with_interpreter(context, |interpreter| eval("mean", interpreter, args)).unwrap()
    }

    fn assert_close(value: Value, expected: f64) {
        match value {
            Value::Number(num) => assert!((num - expected).abs() < 1e-9, "{} != {}", num, expected),
            other => panic!("expected a number, got {}", other),
        }
    }

    fn graded(values: &[(f64, f64)]) -> Value {
        Value::Array(
            values
                .iter()
                .map(|(score, max)| cell_value(cell("hw", Some(*score), *max)))
                .collect(),
        )
    }

    #[test]
    fn weighted_mean_uses_total_points() {
        let result = mean_of(&mut context(true), vec![graded(&[(8.0, 10.0), (18.0, 20.0)])]);
        assert_close(result, 100.0 * 26.0 / 30.0);
    }

    #[test]
    fn unweighted_mean_averages_percentages() {
        let result = mean_of(
            &mut context(true),
            vec![graded(&[(5.0, 10.0), (20.0, 20.0)]), Value::Bool(false)],
        );
        assert_close(result, 75.0);
    }

    #[test]
    fn missing_cells_follow_the_policy() {
        let values = |missing: &ColumnCell| {
            Value::Array(vec![
                cell_value(cell("hw1", Some(10.0), 10.0)),
                cell_value(missing.clone()),
            ])
        };
        let mut missing = cell("hw2", None, 10.0);

        let mut assume_zero = context(true);
        assert_close(mean_of(&mut assume_zero, vec![values(&missing)]), 50.0);

        let mut assume_max = context(true);
        assume_max.incomplete_values_policy = IncompleteValuesPolicy::AssumeMax;
        assert_close(mean_of(&mut assume_max, vec![values(&missing)]), 100.0);

        let mut report_only = context(true);
        report_only.incomplete_values_policy = IncompleteValuesPolicy::ReportOnly;
        assert_close(mean_of(&mut report_only, vec![values(&missing)]), 100.0);

        missing.is_excused = true;
        assert_close(mean_of(&mut context(true), vec![values(&missing)]), 100.0);
    }

    #[test]
    fn unreleased_cells_are_skipped_for_students() {
        let mut hidden = cell("hw2", Some(0.0), 10.0);
        hidden.released = false;
        let values = Value::Array(vec![
            cell_value(cell("hw1", Some(9.0), 10.0)),
            cell_value(hidden),
        ]);

        assert_close(mean_of(&mut context(false), vec![values.clone()]), 90.0);
        assert_close(mean_of(&mut context(true), vec![values]), 45.0);
    }

    #[test]
    fn plain_numbers_average_arithmetically() {
        let values = Value::Array(vec![Value::Number(80.0), Value::Undefined, Value::Number(90.0)]);
        assert_close(mean_of(&mut context(true), vec![values]), 85.0);
    }

    #[test]
    fn nothing_contributing_is_undefined() {
        assert_eq!(
            mean_of(&mut context(true), vec![Value::Array(vec![Value::Undefined])]),
            Value::Undefined
        );
    }
}
