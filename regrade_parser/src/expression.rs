//! AST representation of a gradebook formula.
//!
//! A formula is a `Program`: a list of statements whose value is the value of the last one.
//! Operators are kept as distinct variants so the evaluator can route each one to the
//! built-in function that implements it.
use std::fmt::{Display, Error, Formatter};

type Expr = Box<Expression>;

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Null,
    ValueBool(bool),
    ValueNum(f64),
    ValueString(String),
    Array(Vec<Expression>),
    Symbol(String),
    Parens(Expr),
    Negate(Expr),
    Not(Expr),
    Add(Expr, Expr),
    Subtract(Expr, Expr),
    Multiply(Expr, Expr),
    Divide(Expr, Expr),
    Exponentiate(Expr, Expr),
    Eq(Expr, Expr),
    NotEq(Expr, Expr),
    Gt(Expr, Expr),
    Lt(Expr, Expr),
    Gte(Expr, Expr),
    Lte(Expr, Expr),
    And(Expr, Expr),
    Or(Expr, Expr),
    Conditional(Expr, Expr, Expr),
    Property(Expr, String),
    Fn(String, Vec<Expression>),
    /// An inline definition passed as an argument, e.g. the predicate of `countif`.
    Lambda(Box<FunctionDefinition>),
}

/// `name(params) = body`, either as a statement or inline as an argument.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expression,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    FunctionDefinition(FunctionDefinition),
    Assignment(String, Expression),
    Expression(Expression),
}

/// A parsed formula, including any gradebook prefix that was prepended to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Program {
        Program { statements }
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn statements_mut(&mut self) -> &mut Vec<Statement> {
        &mut self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Every top-level expression in the program, including function bodies.
    pub fn expressions(&self) -> Vec<&Expression> {
        self.statements
            .iter()
            .map(|statement| match statement {
                Statement::FunctionDefinition(definition) => &definition.body,
                Statement::Assignment(_, expr) | Statement::Expression(expr) => expr,
            })
            .collect()
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        self.statements
            .iter_mut()
            .map(|statement| match statement {
                Statement::FunctionDefinition(definition) => &mut definition.body,
                Statement::Assignment(_, expr) | Statement::Expression(expr) => expr,
            })
            .collect()
    }
}

impl Expression {
    /// Direct sub-expressions, left to right.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Null
            | Expression::ValueBool(_)
            | Expression::ValueNum(_)
            | Expression::ValueString(_)
            | Expression::Symbol(_) => vec![],
            Expression::Parens(expr)
            | Expression::Negate(expr)
            | Expression::Not(expr)
            | Expression::Property(expr, _) => vec![&**expr],
            Expression::Add(expr1, expr2)
            | Expression::Subtract(expr1, expr2)
            | Expression::Multiply(expr1, expr2)
            | Expression::Divide(expr1, expr2)
            | Expression::Exponentiate(expr1, expr2)
            | Expression::Eq(expr1, expr2)
            | Expression::NotEq(expr1, expr2)
            | Expression::Gt(expr1, expr2)
            | Expression::Lt(expr1, expr2)
            | Expression::Gte(expr1, expr2)
            | Expression::Lte(expr1, expr2)
            | Expression::And(expr1, expr2)
            | Expression::Or(expr1, expr2) => vec![&**expr1, &**expr2],
            Expression::Conditional(condition, when_true, when_false) => {
                vec![&**condition, &**when_true, &**when_false]
            }
            Expression::Array(exprs) | Expression::Fn(_, exprs) => exprs.iter().collect(),
            Expression::Lambda(definition) => vec![&definition.body],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            Expression::Null
            | Expression::ValueBool(_)
            | Expression::ValueNum(_)
            | Expression::ValueString(_)
            | Expression::Symbol(_) => vec![],
            Expression::Parens(expr)
            | Expression::Negate(expr)
            | Expression::Not(expr)
            | Expression::Property(expr, _) => vec![&mut **expr],
            Expression::Add(expr1, expr2)
            | Expression::Subtract(expr1, expr2)
            | Expression::Multiply(expr1, expr2)
            | Expression::Divide(expr1, expr2)
            | Expression::Exponentiate(expr1, expr2)
            | Expression::Eq(expr1, expr2)
            | Expression::NotEq(expr1, expr2)
            | Expression::Gt(expr1, expr2)
            | Expression::Lt(expr1, expr2)
            | Expression::Gte(expr1, expr2)
            | Expression::Lte(expr1, expr2)
            | Expression::And(expr1, expr2)
            | Expression::Or(expr1, expr2) => vec![&mut **expr1, &mut **expr2],
            Expression::Conditional(condition, when_true, when_false) => {
                vec![&mut **condition, &mut **when_true, &mut **when_false]
            }
            Expression::Array(exprs) | Expression::Fn(_, exprs) => exprs.iter_mut().collect(),
            Expression::Lambda(definition) => vec![&mut definition.body],
        }
    }
}

fn write_list(f: &mut Formatter<'_>, exprs: &[Expression]) -> Result<(), Error> {
    for (index, expr) in exprs.iter().enumerate() {
        if index != 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", expr)?;
    }

    Ok(())
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            Expression::Null => write!(f, "null"),
            Expression::ValueBool(e) => write!(f, "{}", e),
            Expression::ValueNum(e) => write!(f, "{}", e),
            Expression::ValueString(e) => write!(f, "\"{}\"", e),
            Expression::Symbol(e) => write!(f, "{}", e),
            Expression::Array(exprs) => {
                write!(f, "[")?;
                write_list(f, exprs)?;
                write!(f, "]")
            }
            Expression::Parens(expr) => write!(f, "({})", expr),
            Expression::Negate(expr) => write!(f, "-{}", expr),
            Expression::Not(expr) => write!(f, "not {}", expr),
            Expression::Add(expr1, expr2) => write!(f, "{} + {}", expr1, expr2),
            Expression::Subtract(expr1, expr2) => write!(f, "{} - {}", expr1, expr2),
            Expression::Multiply(expr1, expr2) => write!(f, "{} * {}", expr1, expr2),
            Expression::Divide(expr1, expr2) => write!(f, "{} / {}", expr1, expr2),
            Expression::Exponentiate(expr1, expr2) => write!(f, "{} ^ {}", expr1, expr2),
            Expression::Eq(expr1, expr2) => write!(f, "{} == {}", expr1, expr2),
            Expression::NotEq(expr1, expr2) => write!(f, "{} != {}", expr1, expr2),
            Expression::Gt(expr1, expr2) => write!(f, "{} > {}", expr1, expr2),
            Expression::Lt(expr1, expr2) => write!(f, "{} < {}", expr1, expr2),
            Expression::Gte(expr1, expr2) => write!(f, "{} >= {}", expr1, expr2),
            Expression::Lte(expr1, expr2) => write!(f, "{} <= {}", expr1, expr2),
            Expression::And(expr1, expr2) => write!(f, "{} and {}", expr1, expr2),
            Expression::Or(expr1, expr2) => write!(f, "{} or {}", expr1, expr2),
            Expression::Conditional(condition, when_true, when_false) => {
                write!(f, "{} ? {} : {}", condition, when_true, when_false)
            }
            Expression::Property(expr, name) => write!(f, "{}.{}", expr, name),
            Expression::Fn(fn_name, exprs) => {
                write!(f, "{}(", fn_name)?;
                write_list(f, exprs)?;
                write!(f, ")")
            }
            Expression::Lambda(definition) => definition.fmt(f),
        }
    }
}

impl Display for FunctionDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}({}) = {}", self.name, self.params.join(", "), self.body)
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            Statement::FunctionDefinition(definition) => definition.fmt(f),
            Statement::Assignment(name, expr) => write!(f, "{} = {}", name, expr),
            Statement::Expression(expr) => expr.fmt(f),
        }
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        for (index, statement) in self.statements.iter().enumerate() {
            if index != 0 {
                writeln!(f)?;
            }
            write!(f, "{}", statement)?;
        }

        Ok(())
    }
}
