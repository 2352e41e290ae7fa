//! This is the crate responsible for compiling and evaluating gradebook formulas.
//!
//! It has no dependency on the `regrade` crate. It depends on `regrade_parser` for the syntax
//! tree and on `regrade_storage` for the data model and the store contract that dependency
//! sources read through.
//!
//! A formula is compiled once per column into a [`CompiledExpression`]. The compiled plan
//! captures the batch's [`DependencySourceMap`] and is evaluated once per student by handing it
//! an [`ExpressionContext`], which also collects the incomplete-values advisory.

pub mod compiler;
pub mod context;
pub mod functions;
pub mod interpreter;
pub mod sources;
pub mod value;

pub use crate::compiler::{compile, CompiledExpression};
pub use crate::context::ExpressionContext;
pub use crate::interpreter::{Interpreter, MAX_RECURSION_DEPTH};
pub use crate::sources::{
    DependencyKey, DependencySource, DependencySourceMap, ExprDependencyInstance,
};
pub use crate::value::Value;

use regrade_parser::ParseError;
use std::fmt::{Display, Error, Formatter};
use thiserror::Error;

/// The Arity of the function. Used as a value in EvalErrorKind
#[derive(Debug, Clone, PartialEq)]
pub enum Arity {
    One,
    Two,
    OneOrTwo,
    OneOrMore,
    Exactly(usize),
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            Arity::One => write!(f, "1"),
            Arity::Two => write!(f, "2"),
            Arity::OneOrTwo => write!(f, "1 or 2"),
            Arity::OneOrMore => write!(f, "1 or more"),
            Arity::Exactly(n) => write!(f, "{}", n),
        }
    }
}

/// The errors that may occur while evaluating a compiled formula for one student.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalErrorKind {
    #[error("Invalid parameter length. Expected: {}, Got: {}", .0, .1)]
    InvalidParameterLength(Arity, usize),

    #[error("Function `{}` cannot evaluate arguments of the type of `{}`", .0, .1)]
    InvalidType(String, String),

    #[error("Function `{}` is not implemented.", .0)]
    UnimplementedFunction(String),

    #[error("Symbol `{}` is not defined", .0)]
    UndefinedSymbol(String),

    #[error("Property `{}` does not exist on `{}`", .0, .1)]
    InvalidProperty(String, String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Cannot combine arrays of length {} and {}", .0, .1)]
    DimensionMismatch(usize, usize),

    #[error("Recursion deeper than {} calls", .0)]
    RecursionLimit(usize),
}

/// The errors that make a formula unusable before any student is evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("Could not parse formula: {0}")]
    Parse(#[from] ParseError),

    #[error("Formula is empty")]
    EmptyFormula,

    #[error("Function `{}` is not allowed in formulas", .0)]
    BannedFunction(String),

    #[error("Function `{}` is not defined", .0)]
    UnknownFunction(String),

    #[error("`{}` requires a literal key or a literal array of keys", .0)]
    NonLiteralKey(String),
}
