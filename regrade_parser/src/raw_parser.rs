//! This is a monolithic module that parses gradebook formulas.
//! All parsers are public to allow for intermediate-parsing, e.g. a single expression in tests.
//!
//! The return types leak `nom`'s `IResult`. Callers outside this crate should go through
//! `parse_formula`, which returns a plain `ParseError`.
use crate::expression::{Expression, FunctionDefinition, Program, Statement};
use crate::ParseError;

use nom::character::complete;
use nom::error::ErrorKind;
use nom::{branch, bytes, combinator, multi, number, sequence, IResult};
use std::cell::Cell;

/// Words that can never be used as a variable or function name.
pub static RESERVED_WORDS: &[&str] = &["and", "or", "not", "true", "false", "null", "undefined"];

/// How deep parentheses, arrays, calls, unary operators and `^` chains may nest.
pub const MAX_NESTING_DEPTH: usize = 64;

/// How many operators of one precedence level may follow each other, as in `a + b + c`.
/// Chains fold into left-deep trees, so a long chain is deep nesting too.
pub const MAX_CHAIN_LENGTH: usize = 128;

thread_local! {
    static NESTING_DEPTH: Cell<usize> = Cell::new(0);
}

/// Holds one level of nesting for as long as it lives.
struct NestingGuard;

impl NestingGuard {
    /// Fails with `ErrorKind::TooLarge` once the limit is passed. A `Failure` rather than an
    /// `Error` so that no `alt` retries the same input at the same depth.
    fn enter(raw: &str) -> Result<NestingGuard, nom::Err<(&str, ErrorKind)>> {
        let depth = NESTING_DEPTH.with(|depth| {
            depth.set(depth.get() + 1);
            depth.get()
        });
        let guard = NestingGuard;

        if depth > MAX_NESTING_DEPTH {
            return Err(nom::Err::Failure((raw, ErrorKind::TooLarge)));
        }

        Ok(guard)
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        NESTING_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn check_chain<'a, T>(
    raw: &'a str,
    chain: &[T],
) -> Result<(), nom::Err<(&'a str, ErrorKind)>> {
    if chain.len() > MAX_CHAIN_LENGTH {
        return Err(nom::Err::Failure((raw, ErrorKind::Count)));
    }

    Ok(())
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn surround_whitespace<I, O, E: nom::error::ParseError<I>, F>(
    sep: F,
) -> impl Fn(I) -> IResult<I, O, E>
where
    F: Fn(I) -> IResult<I, O, E>,
    I: nom::InputTakeAtPosition,
    <I as nom::InputTakeAtPosition>::Item: nom::AsChar + Clone,
{
    sequence::delimited(complete::multispace0, sep, complete::multispace0)
}

/// Matches `word` only when it isn't the prefix of a longer identifier (`order` is not `or`).
pub fn keyword<'a>(word: &'static str, raw: &'a str) -> IResult<&'a str, &'a str> {
    sequence::terminated(
        bytes::complete::tag(word),
        combinator::not(bytes::complete::take_while1(is_identifier_char)),
    )(raw)
}

pub fn parse_identifier(raw: &str) -> IResult<&str, &str> {
    combinator::verify(
        combinator::recognize(sequence::pair(
            bytes::complete::take_while1(is_identifier_start),
            bytes::complete::take_while(is_identifier_char),
        )),
        |ident: &str| !RESERVED_WORDS.contains(&ident),
    )(raw)
}

pub fn parse_num_value(raw: &str) -> IResult<&str, Expression> {
    combinator::map(number::complete::double, Expression::ValueNum)(raw)
}

/// A single- or double-quoted string. There are no escapes; a string simply cannot contain
/// its own quote character.
pub fn parse_string(raw: &str) -> IResult<&str, Expression> {
    let double_quoted = sequence::delimited(
        complete::char('"'),
        combinator::opt(bytes::complete::is_not("\"")),
        complete::char('"'),
    );
    let single_quoted = sequence::delimited(
        complete::char('\''),
        combinator::opt(bytes::complete::is_not("'")),
        complete::char('\''),
    );

    combinator::map(branch::alt((double_quoted, single_quoted)), |res| {
        Expression::ValueString(String::from(res.unwrap_or("")))
    })(raw)
}

pub fn parse_literal_keyword(raw: &str) -> IResult<&str, Expression> {
    branch::alt((
        combinator::map(|i| keyword("true", i), |_| Expression::ValueBool(true)),
        combinator::map(|i| keyword("false", i), |_| Expression::ValueBool(false)),
        combinator::map(|i| keyword("null", i), |_| Expression::Null),
        combinator::map(|i| keyword("undefined", i), |_| Expression::Null),
    ))(raw)
}

pub fn parse_symbol(raw: &str) -> IResult<&str, Expression> {
    combinator::map(parse_identifier, |name| Expression::Symbol(String::from(name)))(raw)
}

fn parse_params(raw: &str) -> IResult<&str, Vec<&str>> {
    sequence::delimited(
        sequence::tuple((complete::char('('), complete::multispace0)),
        multi::separated_list(surround_whitespace(complete::char(',')), parse_identifier),
        sequence::tuple((complete::multispace0, complete::char(')'))),
    )(raw)
}

/// A single `=` that is not the start of `==`.
fn assign_op(raw: &str) -> IResult<&str, char> {
    sequence::delimited(
        complete::multispace0,
        sequence::terminated(complete::char('='), combinator::not(complete::char('='))),
        complete::multispace0,
    )(raw)
}

pub fn parse_function_definition(raw: &str) -> IResult<&str, FunctionDefinition> {
    let (rem, (name, params)) = sequence::pair(parse_identifier, parse_params)(raw)?;
    let (rem, _) = assign_op(rem)?;
    let (rem, body) = parse_expression(rem)?;

    Ok((
        rem,
        FunctionDefinition {
            name: String::from(name),
            params: params.into_iter().map(String::from).collect(),
            body,
        },
    ))
}

fn parse_argument(raw: &str) -> IResult<&str, Expression> {
    branch::alt((
        combinator::map(parse_function_definition, |definition| {
            Expression::Lambda(Box::new(definition))
        }),
        parse_expression,
    ))(raw)
}

pub fn parse_func(raw: &str) -> IResult<&str, Expression> {
    let (rem, func_name) = parse_identifier(raw)?;
    let (rem, args) = sequence::delimited(
        sequence::tuple((complete::char('('), complete::multispace0)),
        multi::separated_list(surround_whitespace(complete::char(',')), parse_argument),
        sequence::tuple((complete::multispace0, complete::char(')'))),
    )(rem)?;

    Ok((rem, Expression::Fn(String::from(func_name), args)))
}

pub fn parse_array(raw: &str) -> IResult<&str, Expression> {
    combinator::map(
        sequence::delimited(
            sequence::tuple((complete::char('['), complete::multispace0)),
            multi::separated_list(surround_whitespace(complete::char(',')), parse_expression),
            sequence::tuple((complete::multispace0, complete::char(']'))),
        ),
        Expression::Array,
    )(raw)
}

pub fn parens(raw: &str) -> IResult<&str, Expression> {
    let (rem, expr) = sequence::delimited(
        complete::char('('),
        surround_whitespace(parse_expression),
        complete::char(')'),
    )(raw)?;

    Ok((rem, Expression::Parens(Box::new(expr))))
}

pub fn expr_level_val(raw: &str) -> IResult<&str, Expression> {
    branch::alt((
        parens,
        parse_array,
        parse_num_value,
        parse_string,
        parse_literal_keyword,
        parse_func,
        parse_symbol,
    ))(raw)
}

pub fn expr_level_property(raw: &str) -> IResult<&str, Expression> {
    let (rem, base) = expr_level_val(raw)?;
    let (rem, properties) =
        multi::many0(sequence::preceded(complete::char('.'), parse_identifier))(rem)?;

    Ok((
        rem,
        properties.into_iter().fold(base, |acc, name| {
            Expression::Property(Box::new(acc), String::from(name))
        }),
    ))
}

/// `^` binds tighter than unary minus and is right-associative: `-2^2` is `-(2^2)`.
pub fn expr_level_exponentiate(raw: &str) -> IResult<&str, Expression> {
    let (rem, base) = expr_level_property(raw)?;
    let caret: IResult<&str, char> = surround_whitespace(complete::char('^'))(rem);
    let after_caret = match caret {
        Ok((after_caret, _)) => after_caret,
        Err(nom::Err::Error(_)) => return Ok((rem, base)),
        Err(e) => return Err(e),
    };

    let _guard = NestingGuard::enter(after_caret)?;
    match expr_level_negate(after_caret) {
        Ok((rem, exponent)) => Ok((
            rem,
            Expression::Exponentiate(Box::new(base), Box::new(exponent)),
        )),
        Err(nom::Err::Error(_)) => Ok((rem, base)),
        Err(e) => Err(e),
    }
}

pub fn expr_level_negate(raw: &str) -> IResult<&str, Expression> {
    let res: IResult<&str, char> =
        sequence::terminated(complete::char('-'), complete::multispace0)(raw);

    match res {
        Ok((rem, _)) => {
            let _guard = NestingGuard::enter(rem)?;
            let (rem, val) = expr_level_negate(rem)?;

            Ok((rem, Expression::Negate(Box::new(val))))
        }
        Err(_) => expr_level_exponentiate(raw),
    }
}

pub fn expr_level_multiply_divide(raw: &str) -> IResult<&str, Expression> {
    let (left_rem, left_res) = expr_level_negate(raw)?;
    let (right_rem, right_res) = multi::many0(sequence::tuple((
        surround_whitespace(branch::alt((
            bytes::complete::tag("*"),
            bytes::complete::tag("/"),
        ))),
        expr_level_negate,
    )))(left_rem)?;
    check_chain(left_rem, &right_res)?;

    Ok((right_rem, parse_expression_recur(left_res, right_res)))
}

pub fn expr_level_plus_minus(raw: &str) -> IResult<&str, Expression> {
    let (left_rem, left_res) = expr_level_multiply_divide(raw)?;
    let (right_rem, right_res) = multi::many0(sequence::tuple((
        surround_whitespace(branch::alt((
            bytes::complete::tag("+"),
            bytes::complete::tag("-"),
        ))),
        expr_level_multiply_divide,
    )))(left_rem)?;
    check_chain(left_rem, &right_res)?;

    Ok((right_rem, parse_expression_recur(left_res, right_res)))
}

pub fn expr_level_comparison(raw: &str) -> IResult<&str, Expression> {
    let (left_rem, left_res) = expr_level_plus_minus(raw)?;
    let (right_rem, right_res) = multi::many0(sequence::tuple((
        surround_whitespace(branch::alt((
            bytes::complete::tag("=="),
            bytes::complete::tag("!="),
            bytes::complete::tag("<="),
            bytes::complete::tag(">="),
            bytes::complete::tag("<"),
            bytes::complete::tag(">"),
        ))),
        expr_level_plus_minus,
    )))(left_rem)?;
    check_chain(left_rem, &right_res)?;

    Ok((right_rem, parse_expression_recur(left_res, right_res)))
}

pub fn expr_level_not(raw: &str) -> IResult<&str, Expression> {
    let res: IResult<&str, &str> =
        sequence::terminated(|i| keyword("not", i), complete::multispace0)(raw);

    match res {
        Ok((rem, _)) => {
            let _guard = NestingGuard::enter(rem)?;
            let (rem, val) = expr_level_not(rem)?;

            Ok((rem, Expression::Not(Box::new(val))))
        }
        Err(_) => expr_level_comparison(raw),
    }
}

pub fn expr_level_and(raw: &str) -> IResult<&str, Expression> {
    let (left_rem, left_res) = expr_level_not(raw)?;
    let (right_rem, right_res) = multi::many0(sequence::tuple((
        surround_whitespace(|i| keyword("and", i)),
        expr_level_not,
    )))(left_rem)?;
    check_chain(left_rem, &right_res)?;

    Ok((right_rem, parse_expression_recur(left_res, right_res)))
}

pub fn expr_level_or(raw: &str) -> IResult<&str, Expression> {
    let (left_rem, left_res) = expr_level_and(raw)?;
    let (right_rem, right_res) = multi::many0(sequence::tuple((
        surround_whitespace(|i| keyword("or", i)),
        expr_level_and,
    )))(left_rem)?;
    check_chain(left_rem, &right_res)?;

    Ok((right_rem, parse_expression_recur(left_res, right_res)))
}

pub fn expr_level_conditional(raw: &str) -> IResult<&str, Expression> {
    let (rem, condition) = expr_level_or(raw)?;
    let branches: IResult<&str, (Expression, Expression)> = sequence::preceded(
        surround_whitespace(complete::char('?')),
        sequence::separated_pair(
            parse_expression,
            surround_whitespace(complete::char(':')),
            parse_expression,
        ),
    )(rem);

    match branches {
        Ok((rem, (when_true, when_false))) => Ok((
            rem,
            Expression::Conditional(
                Box::new(condition),
                Box::new(when_true),
                Box::new(when_false),
            ),
        )),
        Err(nom::Err::Error(_)) => Ok((rem, condition)),
        Err(e) => Err(e),
    }
}

/// Every nested parenthesis, array element, call argument and conditional branch comes
/// through here, so this is where nesting is counted.
pub fn parse_expression(raw: &str) -> IResult<&str, Expression> {
    let _guard = NestingGuard::enter(raw)?;
    expr_level_conditional(raw)
}

pub fn parse_expression_recur(raw: Expression, rem: Vec<(&str, Expression)>) -> Expression {
    rem.into_iter()
        .fold(raw, |acc, val| parse_binary_op(val, acc))
}

pub fn parse_binary_op((op, expr2): (&str, Expression), expr1: Expression) -> Expression {
    let (expr1, expr2) = (Box::new(expr1), Box::new(expr2));

    match op {
        "+" => Expression::Add(expr1, expr2),
        "-" => Expression::Subtract(expr1, expr2),
        "*" => Expression::Multiply(expr1, expr2),
        "/" => Expression::Divide(expr1, expr2),
        "==" => Expression::Eq(expr1, expr2),
        "!=" => Expression::NotEq(expr1, expr2),
        "<" => Expression::Lt(expr1, expr2),
        "<=" => Expression::Lte(expr1, expr2),
        ">" => Expression::Gt(expr1, expr2),
        ">=" => Expression::Gte(expr1, expr2),
        "and" => Expression::And(expr1, expr2),
        "or" => Expression::Or(expr1, expr2),
        e => unreachable!("Unhandled operator type! {}", e),
    }
}

pub fn parse_statement(raw: &str) -> IResult<&str, Statement> {
    branch::alt((
        combinator::map(parse_function_definition, Statement::FunctionDefinition),
        combinator::map(
            sequence::separated_pair(parse_identifier, assign_op, parse_expression),
            |(name, expr)| Statement::Assignment(String::from(name), expr),
        ),
        combinator::map(parse_expression, Statement::Expression),
    ))(raw)
}

pub fn parse_comment(raw: &str) -> IResult<&str, &str> {
    combinator::recognize(sequence::pair(
        complete::char('#'),
        combinator::opt(bytes::complete::is_not("\r\n")),
    ))(raw)
}

/// One or more statement terminators (`;` or a line break), with trailing comments.
pub fn parse_separator(raw: &str) -> IResult<&str, &str> {
    combinator::recognize(multi::many1(sequence::tuple((
        complete::space0,
        combinator::opt(parse_comment),
        branch::alt((
            bytes::complete::tag(";"),
            bytes::complete::tag("\r\n"),
            bytes::complete::tag("\n"),
        )),
        complete::space0,
    ))))(raw)
}

fn blank(raw: &str) -> IResult<&str, &str> {
    combinator::recognize(multi::many0(branch::alt((
        complete::multispace1,
        parse_comment,
    ))))(raw)
}

pub fn parse_program(raw: &str) -> IResult<&str, Program> {
    let (rem, _) = blank(raw)?;
    let (rem, statements) = multi::separated_list(parse_separator, parse_statement)(rem)?;
    let (rem, _) = combinator::opt(parse_separator)(rem)?;
    let (rem, _) = blank(rem)?;

    Ok((rem, Program::new(statements)))
}

pub fn parse_formula(raw: &str) -> Result<Program, ParseError> {
    match combinator::all_consuming(parse_program)(raw) {
        Ok((_, program)) => Ok(program),
        Err(nom::Err::Incomplete(_)) => Err(ParseError(String::from("Incomplete formula"))),
        Err(nom::Err::Failure((rem, ErrorKind::TooLarge))) => Err(ParseError(format!(
            "Formula nests deeper than {} levels at position {}",
            MAX_NESTING_DEPTH,
            raw.len() - rem.len()
        ))),
        Err(nom::Err::Failure((rem, ErrorKind::Count))) => Err(ParseError(format!(
            "Formula chains more than {} operators at position {}",
            MAX_CHAIN_LENGTH,
            raw.len() - rem.len()
        ))),
        Err(nom::Err::Error((rem, _))) | Err(nom::Err::Failure((rem, _))) => {
            let offset = raw.len() - rem.len();
            let snippet: String = rem.chars().take(20).collect();

            Err(ParseError(format!(
                "Unexpected input at position {}: `{}`",
                offset, snippet
            )))
        }
    }
}
