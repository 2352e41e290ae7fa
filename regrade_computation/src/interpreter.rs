//! Tree-walking evaluation of a parsed formula for one student.

use crate::functions::{self, *};
use crate::sources::{DependencyKey, DependencySourceMap};
use crate::{Arity, EvalErrorKind, ExpressionContext, Value};
use regrade_parser::{Expression, FunctionDefinition, Program, Statement};
use regrade_storage::DependencyKind;
use std::collections::HashMap;
use std::sync::Arc;

/// User function calls nest at most this deep.
pub const MAX_RECURSION_DEPTH: usize = 64;

pub struct Interpreter<'a> {
    context: &'a mut ExpressionContext,
    sources: &'a DependencySourceMap,
    scopes: Vec<HashMap<String, Value>>,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(context: &'a mut ExpressionContext, sources: &'a DependencySourceMap) -> Self {
        Interpreter {
            context,
            sources,
            scopes: vec![HashMap::new()],
            depth: 0,
        }
    }

    pub fn context(&self) -> &ExpressionContext {
        &*self.context
    }

    pub fn context_mut(&mut self) -> &mut ExpressionContext {
        &mut *self.context
    }

    /// Runs every statement in order. The program's value is the value of its last statement;
    /// definitions and assignments evaluate to what they bind.
    pub fn eval_program(&mut self, program: &Program) -> Result<Value, EvalErrorKind> {
        let mut last = Value::Undefined;

        for statement in program.statements() {
            last = match statement {
                Statement::FunctionDefinition(definition) => {
                    let function = Value::Function(Arc::new(definition.clone()));
                    self.bind(&definition.name, function.clone());
                    function
                }
                Statement::Assignment(name, expr) => {
                    let value = self.eval(expr)?;
                    self.bind(name, value.clone());
                    value
                }
                Statement::Expression(expr) => self.eval(expr)?,
            };
        }

        Ok(last)
    }

    pub fn eval(&mut self, expr: &Expression) -> Result<Value, EvalErrorKind> {
        match expr {
            Expression::Null => Ok(Value::Undefined),
            Expression::ValueBool(b) => Ok(Value::Bool(*b)),
            Expression::ValueNum(num) => Ok(Value::Number(*num)),
            Expression::ValueString(s) => Ok(Value::String(s.clone())),
            Expression::Array(exprs) => Ok(Value::Array(self.eval_all(exprs)?)),
            Expression::Symbol(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalErrorKind::UndefinedSymbol(name.clone())),
            Expression::Parens(expr) => self.eval(expr),
            Expression::Negate(expr) => self.unary(UNARY_MINUS_FUNC, expr),
            Expression::Not(expr) => self.unary(NOT_FUNC, expr),
            Expression::Add(expr1, expr2) => self.binary(ADD_FUNC, expr1, expr2),
            Expression::Subtract(expr1, expr2) => self.binary(SUBTRACT_FUNC, expr1, expr2),
            Expression::Multiply(expr1, expr2) => self.binary(MULTIPLY_FUNC, expr1, expr2),
            Expression::Divide(expr1, expr2) => self.binary(DIVIDE_FUNC, expr1, expr2),
            Expression::Exponentiate(expr1, expr2) => self.binary(POW_FUNC, expr1, expr2),
            Expression::Eq(expr1, expr2) => self.binary(EQUAL_FUNC, expr1, expr2),
            Expression::NotEq(expr1, expr2) => self.binary(UNEQUAL_FUNC, expr1, expr2),
            Expression::Gt(expr1, expr2) => self.binary(LARGER_FUNC, expr1, expr2),
            Expression::Gte(expr1, expr2) => self.binary(LARGER_EQ_FUNC, expr1, expr2),
            Expression::Lt(expr1, expr2) => self.binary(SMALLER_FUNC, expr1, expr2),
            Expression::Lte(expr1, expr2) => self.binary(SMALLER_EQ_FUNC, expr1, expr2),
            // `and`, `or` and the conditional only evaluate the side they need.
            Expression::And(expr1, expr2) => {
                if self.eval(expr1)?.is_truthy() {
                    Ok(Value::Bool(self.eval(expr2)?.is_truthy()))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expression::Or(expr1, expr2) => {
                if self.eval(expr1)?.is_truthy() {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(self.eval(expr2)?.is_truthy()))
                }
            }
            Expression::Conditional(condition, when_true, when_false) => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(when_true)
                } else {
                    self.eval(when_false)
                }
            }
            Expression::Property(expr, name) => {
                let value = self.eval(expr)?;
                property(value, name)
            }
            Expression::Fn(name, args) => self.call(name, args),
            Expression::Lambda(definition) => {
                Ok(Value::Function(Arc::new((**definition).clone())))
            }
        }
    }

    /// Calls a user-defined function with already evaluated arguments.
    pub fn apply(
        &mut self,
        function: &FunctionDefinition,
        args: Vec<Value>,
    ) -> Result<Value, EvalErrorKind> {
        if function.params.len() != args.len() {
            return Err(EvalErrorKind::InvalidParameterLength(
                Arity::Exactly(function.params.len()),
                args.len(),
            ));
        }

        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(EvalErrorKind::RecursionLimit(MAX_RECURSION_DEPTH));
        }

        self.depth += 1;
        self.scopes.push(function.params.iter().cloned().zip(args).collect());

        let result = self.eval(&function.body);

        self.scopes.pop();
        self.depth -= 1;

        result
    }

    fn call(&mut self, name: &str, args: &[Expression]) -> Result<Value, EvalErrorKind> {
        if let Some(kind) = DependencyKind::from_function_name(name) {
            return self.call_dependency(kind, name, args);
        }

        if name == CASE_WHEN_FUNC && self.lookup(name).is_none() {
            if let Some(pairs) = functions::case_when::literal_pairs(args) {
                return functions::case_when::eval_lazy(self, &pairs);
            }
        }

        let values = self.eval_all(args)?;

        if let Some(Value::Function(function)) = self.lookup(name).cloned() {
            return self.apply(&function, values);
        }

        self.call_built_in(name, values)
    }

    fn unary(&mut self, name: &str, expr: &Expression) -> Result<Value, EvalErrorKind> {
        let value = self.eval(expr)?;
        self.call_built_in(name, vec![value])
    }

    fn binary(
        &mut self,
        name: &str,
        left: &Expression,
        right: &Expression,
    ) -> Result<Value, EvalErrorKind> {
        let left = self.eval(left)?;
        let right = self.eval(right)?;
        self.call_built_in(name, vec![left, right])
    }

    fn call_built_in(&mut self, name: &str, values: Vec<Value>) -> Result<Value, EvalErrorKind> {
        match functions::built_in(name) {
            Some(built_in) => built_in(name, self, values),
            None => Err(EvalErrorKind::UnimplementedFunction(name.to_string())),
        }
    }

    fn call_dependency(
        &mut self,
        kind: DependencyKind,
        name: &str,
        args: &[Expression],
    ) -> Result<Value, EvalErrorKind> {
        if args.len() != 1 {
            return Err(EvalErrorKind::InvalidParameterLength(Arity::One, args.len()));
        }

        let key = match self.eval(&args[0])? {
            Value::String(key) => DependencyKey::One(key),
            Value::Array(values) => {
                let mut keys = Vec::with_capacity(values.len());
                for value in values {
                    match value {
                        Value::String(key) => keys.push(key),
                        other => {
                            return Err(EvalErrorKind::InvalidType(
                                name.to_string(),
                                other.type_name().to_string(),
                            ))
                        }
                    }
                }
                DependencyKey::Many(keys)
            }
            other => {
                return Err(EvalErrorKind::InvalidType(
                    name.to_string(),
                    other.type_name().to_string(),
                ))
            }
        };

        self.sources
            .execute(kind, &mut *self.context, &key)
            .ok_or_else(|| EvalErrorKind::UnimplementedFunction(name.to_string()))
    }

    fn eval_all(&mut self, exprs: &[Expression]) -> Result<Vec<Value>, EvalErrorKind> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }
}

/// Reads a field of a cell. Arrays map the read over their elements.
fn property(value: Value, name: &str) -> Result<Value, EvalErrorKind> {
    match value {
        Value::Undefined => Ok(Value::Undefined),
        Value::Array(values) => Ok(Value::Array(
            values
                .into_iter()
                .map(|value| property(value, name))
                .collect::<Result<_, _>>()?,
        )),
        Value::Cell(cell) => match name {
            "score" => Ok(cell.effective_score().into()),
            "max_score" => Ok(cell.max_score.into()),
            "is_missing" => Ok(cell.is_missing.into()),
            "is_excused" => Ok(cell.is_excused.into()),
            "is_droppable" => Ok(cell.is_droppable.into()),
            "released" => Ok(cell.released.into()),
            "slug" => Ok(Value::String(cell.column_slug)),
            _ => Err(EvalErrorKind::InvalidProperty(
                name.to_string(),
                "cell".to_string(),
            )),
        },
        other => Err(EvalErrorKind::InvalidProperty(
            name.to_string(),
            other.type_name().to_string(),
        )),
    }
}
