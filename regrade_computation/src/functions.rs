//! The built-in function library.
//!
//! Formulas can only reach what is registered in `BUILT_IN_FUNCTIONS`, the two dependency
//! functions, and their own definitions. Operators are desugared by the interpreter into calls to
//! the named functions below.

mod arithmetic;
pub(crate) mod case_when;
mod compare;
mod countif;
mod drop_lowest;
pub mod eval_helper;
mod math;
mod mean;
mod min_max;
mod sum;

use crate::{EvalErrorKind, Interpreter, Value};
use lazy_static::lazy_static;
use std::collections::HashMap;

// Function pointers keep dispatch static; every built-in receives the interpreter so it can read
// the evaluation context or call back into user functions.
pub type BuiltInFunction = for<'a, 'b> fn(
    fn_name: &str,
    interpreter: &'a mut Interpreter<'b>,
    args: Vec<Value>,
) -> Result<Value, EvalErrorKind>;

pub static ADD_FUNC: &str = "add";
pub static SUBTRACT_FUNC: &str = "subtract";
pub static MULTIPLY_FUNC: &str = "multiply";
pub static DIVIDE_FUNC: &str = "divide";
pub static POW_FUNC: &str = "pow";
pub static UNARY_MINUS_FUNC: &str = "unaryMinus";
pub static EQUAL_FUNC: &str = "equal";
pub static UNEQUAL_FUNC: &str = "unequal";
pub static LARGER_FUNC: &str = "larger";
pub static LARGER_EQ_FUNC: &str = "largerEq";
pub static SMALLER_FUNC: &str = "smaller";
pub static SMALLER_EQ_FUNC: &str = "smallerEq";
pub static NOT_FUNC: &str = "not";
pub static CASE_WHEN_FUNC: &str = "case_when";

/// Names that must never be callable from a formula, even if a definition shadows them.
pub static BANNED_FUNCTIONS: &[&str] = &[
    "import",
    "createUnit",
    "reviver",
    "evaluate",
    "parse",
    "compile",
    "simplify",
    "derivative",
    "resolve",
];

lazy_static! {
    static ref BUILT_IN_FUNCTIONS: HashMap<&'static str, BuiltInFunction> = {
        let mut set = HashMap::new();
        set.insert(ADD_FUNC, arithmetic::add as BuiltInFunction);
        set.insert(SUBTRACT_FUNC, arithmetic::subtract as BuiltInFunction);
        set.insert(MULTIPLY_FUNC, arithmetic::multiply as BuiltInFunction);
        set.insert(DIVIDE_FUNC, arithmetic::divide as BuiltInFunction);
        set.insert(POW_FUNC, arithmetic::pow as BuiltInFunction);
        set.insert(UNARY_MINUS_FUNC, arithmetic::unary_minus as BuiltInFunction);
        set.insert(EQUAL_FUNC, compare::equal as BuiltInFunction);
        set.insert(UNEQUAL_FUNC, compare::unequal as BuiltInFunction);
        set.insert(LARGER_FUNC, compare::larger as BuiltInFunction);
        set.insert(LARGER_EQ_FUNC, compare::larger_eq as BuiltInFunction);
        set.insert(SMALLER_FUNC, compare::smaller as BuiltInFunction);
        set.insert(SMALLER_EQ_FUNC, compare::smaller_eq as BuiltInFunction);
        set.insert(NOT_FUNC, math::not as BuiltInFunction);

        set.insert("mean", mean::eval as BuiltInFunction);
        set.insert("sum", sum::eval as BuiltInFunction);
        set.insert("countif", countif::eval as BuiltInFunction);
        set.insert("drop_lowest", drop_lowest::eval as BuiltInFunction);
        set.insert(CASE_WHEN_FUNC, case_when::eval as BuiltInFunction);
        set.insert("min", min_max::min as BuiltInFunction);
        set.insert("max", min_max::max as BuiltInFunction);
        set.insert("round", math::round as BuiltInFunction);
        set.insert("floor", math::floor as BuiltInFunction);
        set.insert("ceil", math::ceil as BuiltInFunction);
        set.insert("abs", math::abs as BuiltInFunction);

        set
    };
}

pub fn built_in(fn_name: &str) -> Option<BuiltInFunction> {
    if is_banned(fn_name) {
        return None;
    }

    BUILT_IN_FUNCTIONS.get(fn_name).copied()
}

pub fn is_built_in(fn_name: &str) -> bool {
    built_in(fn_name).is_some()
}

pub fn is_banned(fn_name: &str) -> bool {
    BANNED_FUNCTIONS.contains(&fn_name)
}
