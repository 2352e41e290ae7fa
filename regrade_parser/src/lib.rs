//! This crate parses gradebook formulas into an AST.
//!
//! The formula language is small: numbers, strings, booleans, arrays, arithmetic and comparison
//! operators, `and`/`or`/`not`, the `? :` conditional, property access on cells, function calls,
//! and user definitions (`name = expr`, `name(params) = expr`). Statements are separated by `;`
//! or line breaks and a program evaluates to its last statement.
//!
//! Parsing never executes anything, so the same parser backs both compilation and dependency
//! extraction.
//!
//! ## Example
//! ```
//! use regrade_parser::*;
//!
//! let parsed = parse_formula("sum(assignments(\"hw1\"), 2)").unwrap();
//!
//! assert_eq!(parsed.statements(),
//!     &[Statement::Expression(
//!         Expression::Fn(
//!             "sum".to_string(),
//!             vec![
//!                 Expression::Fn(
//!                     "assignments".to_string(),
//!                     vec![Expression::ValueString("hw1".to_string())]
//!                 ),
//!                 Expression::ValueNum(2.0)
//!             ]
//!         )
//!     )]
//! );
//! ```

pub mod expression;
pub mod raw_parser;

pub use crate::expression::*;
pub use crate::raw_parser::parse_formula;

use thiserror::Error;

/// A formula could not be parsed. Holds a human-readable description of where it failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ParseError(pub String);
