use regrade_parser::FunctionDefinition;
use regrade_storage::ColumnCell;
use std::fmt::{Display, Error, Formatter};
use std::sync::Arc;

/// A value produced while evaluating a formula.
///
/// `Undefined` stands for "no value": an input that is missing or withheld. Most functions
/// propagate it instead of failing.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Cell(Box<ColumnCell>),
    Array(Vec<Value>),
    Function(Arc<FunctionDefinition>),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Cell(cell) => cell.effective_score().map_or(false, |score| score != 0.0),
            Value::Array(values) => !values.is_empty(),
            Value::Function(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Cell(_) => "cell",
            Value::Array(_) => "array",
            Value::Function(_) => "function",
        }
    }

    /// The elements of an array, or the value itself as a single element.
    pub fn into_elements(self) -> Vec<Value> {
        match self {
            Value::Array(values) => values,
            value => vec![value],
        }
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Number(num)
    }
}

impl From<Option<f64>> for Value {
    fn from(num: Option<f64>) -> Self {
        num.map_or(Value::Undefined, Value::Number)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Cell(cell) => match cell.effective_score() {
                Some(score) => write!(f, "{}({})", cell.column_slug, score),
                None => write!(f, "{}(undefined)", cell.column_slug),
            },
            Value::Array(values) => {
                write!(f, "[")?;
                for (index, value) in values.iter().enumerate() {
                    if index != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Value::Function(definition) => write!(f, "{}", definition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cell;
    use pretty_assertions::assert_eq;

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::String("a".into()).is_truthy());
        assert!(Value::Cell(Box::new(cell("hw1", Some(3.0), 10.0))).is_truthy());
        assert!(!Value::Cell(Box::new(cell("hw1", None, 10.0))).is_truthy());
    }

    #[test]
    fn display_uses_effective_score() {
        let mut graded = cell("hw1", Some(3.0), 10.0);
        graded.score_override = Some(9.0);

        assert_eq!(
            Value::Array(vec![Value::Cell(Box::new(graded)), Value::Undefined]).to_string(),
            "[hw1(9), undefined]"
        );
    }
}
