//! Turns a formula into a [`CompiledExpression`].
//!
//! Compiling parses the gradebook prefix and the formula together, then makes a single pass over
//! the tree that rejects banned and unknown functions, checks that every dependency call has a
//! literal key, and replaces each glob key by the literal array of slugs it matches in the
//! column's class. The result is evaluated once per student.

use crate::functions;
use crate::sources::DependencySourceMap;
use crate::{CompileErrorKind, EvalErrorKind, ExpressionContext, Interpreter, Value};
use regrade_parser::{parse_formula, Expression, Program, Statement};
use regrade_storage::{ClassId, DependencyKind};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

type Plan = dyn Fn(&mut ExpressionContext) -> Result<Value, EvalErrorKind> + Send + Sync;

/// A compiled formula. Cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct CompiledExpression {
    source: Arc<str>,
    plan: Arc<Plan>,
}

impl CompiledExpression {
    pub fn evaluate(&self, context: &mut ExpressionContext) -> Result<Value, EvalErrorKind> {
        (self.plan)(context)
    }

    /// The formula text that was compiled, prefix included.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .finish()
    }
}

/// Joins the gradebook prefix and a column formula into the text that gets parsed.
pub fn formula_text(prefix: Option<&str>, formula: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.trim().is_empty() => format!("{}\n{}", prefix, formula),
        _ => formula.to_string(),
    }
}

pub fn compile(
    prefix: Option<&str>,
    formula: &str,
    class_id: ClassId,
    sources: Arc<DependencySourceMap>,
) -> Result<CompiledExpression, CompileErrorKind> {
    let text = formula_text(prefix, formula);
    let mut program = parse_formula(&text)?;

    if program.is_empty() {
        return Err(CompileErrorKind::EmptyFormula);
    }

    let callables = local_callables(&program);
    for expr in program.expressions_mut() {
        rewrite(expr, &callables, class_id, &sources)?;
    }

    let program = Arc::new(program);
    let plan = move |context: &mut ExpressionContext| {
        Interpreter::new(context, &sources).eval_program(&program)
    };

    Ok(CompiledExpression {
        source: text.into(),
        plan: Arc::new(plan),
    })
}

/// Names a formula may call besides built-ins: its own definitions, variables and parameters.
/// Whether a variable actually holds a function is only known when it is evaluated.
fn local_callables(program: &Program) -> HashSet<String> {
    let mut names = HashSet::new();

    for statement in program.statements() {
        match statement {
            Statement::FunctionDefinition(definition) => {
                names.insert(definition.name.clone());
                names.extend(definition.params.iter().cloned());
            }
            Statement::Assignment(name, _) => {
                names.insert(name.clone());
            }
            Statement::Expression(_) => {}
        }
    }

    for expr in program.expressions() {
        collect_lambda_params(expr, &mut names);
    }

    names
}

fn collect_lambda_params(expr: &Expression, names: &mut HashSet<String>) {
    if let Expression::Lambda(definition) = expr {
        names.insert(definition.name.clone());
        names.extend(definition.params.iter().cloned());
    }

    for child in expr.children() {
        collect_lambda_params(child, names);
    }
}

fn rewrite(
    expr: &mut Expression,
    callables: &HashSet<String>,
    class_id: ClassId,
    sources: &DependencySourceMap,
) -> Result<(), CompileErrorKind> {
    if let Expression::Fn(name, args) = expr {
        if functions::is_banned(name) {
            return Err(CompileErrorKind::BannedFunction(name.clone()));
        }

        if let Some(kind) = DependencyKind::from_function_name(name) {
            expand_key_argument(kind, name, args, class_id, sources)?;
        } else if !functions::is_built_in(name) && !callables.contains(name.as_str()) {
            return Err(CompileErrorKind::UnknownFunction(name.clone()));
        }
    }

    for child in expr.children_mut() {
        rewrite(child, callables, class_id, sources)?;
    }

    Ok(())
}

fn expand_key_argument(
    kind: DependencyKind,
    name: &str,
    args: &mut Vec<Expression>,
    class_id: ClassId,
    sources: &DependencySourceMap,
) -> Result<(), CompileErrorKind> {
    let expand = |key: &str| -> Vec<Expression> {
        if key.contains('*') {
            sources
                .expand_key(kind, key, class_id)
                .into_iter()
                .map(Expression::ValueString)
                .collect()
        } else {
            vec![Expression::ValueString(key.to_string())]
        }
    };

    let expanded = match args.as_slice() {
        [Expression::ValueString(key)] if key.contains('*') => Expression::Array(expand(key)),
        [Expression::ValueString(_)] => return Ok(()),
        [Expression::Array(keys)] => {
            let mut expanded = vec![];
            for key in keys {
                match key {
                    Expression::ValueString(key) => expanded.extend(expand(key)),
                    _ => return Err(CompileErrorKind::NonLiteralKey(name.to_string())),
                }
            }
            Expression::Array(expanded)
        }
        _ => return Err(CompileErrorKind::NonLiteralKey(name.to_string())),
    };

    *args = vec![expanded];
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{AssignmentsSource, DependencySource};
    use crate::test_utils::{context, CLASS_ID};
    use pretty_assertions::assert_eq;
    use regrade_storage::{Assignment, GradebookSnapshot, InMemoryStore};

    fn empty() -> Arc<DependencySourceMap> {
        Arc::new(DependencySourceMap::empty())
    }

    async fn with_assignments(slugs: &[&str]) -> Arc<DependencySourceMap> {
        let store = InMemoryStore::from_snapshot(GradebookSnapshot {
            assignments: slugs
                .iter()
                .enumerate()
                .map(|(id, slug)| Assignment {
                    id: id as i64,
                    class_id: CLASS_ID,
                    slug: slug.to_string(),
                    total_points: None,
                })
                .collect(),
            ..GradebookSnapshot::default()
        });

        let mut source = AssignmentsSource::new(100);
        source.load_universe(CLASS_ID, &store).await.unwrap();
        Arc::new(DependencySourceMap::new(vec![Box::new(source)]))
    }

    #[test]
    fn banned_functions_are_rejected() {
        for formula in &["evaluate('1 + 1')", "f(x) = import(x)\nf(1)", "sum([parse('1')])"] {
            assert!(matches!(
                compile(None, formula, CLASS_ID, empty()),
                Err(CompileErrorKind::BannedFunction(_))
            ));
        }
    }

    #[test]
    fn unknown_functions_are_rejected() {
        assert_eq!(
            compile(None, "frobnicate(1)", CLASS_ID, empty()).unwrap_err(),
            CompileErrorKind::UnknownFunction("frobnicate".into())
        );
    }

    #[test]
    fn dependency_keys_must_be_literal() {
        assert_eq!(
            compile(None, "key = 'hw1'\nassignments(key)", CLASS_ID, empty()).unwrap_err(),
            CompileErrorKind::NonLiteralKey("assignments".into())
        );
        assert_eq!(
            compile(None, "gradebook_columns(['a', 1])", CLASS_ID, empty()).unwrap_err(),
            CompileErrorKind::NonLiteralKey("gradebook_columns".into())
        );
    }

    #[test]
    fn parse_errors_and_empty_formulas() {
        assert!(matches!(
            compile(None, "1 +", CLASS_ID, empty()),
            Err(CompileErrorKind::Parse(_))
        ));
        assert_eq!(
            compile(None, "  # nothing here", CLASS_ID, empty()).unwrap_err(),
            CompileErrorKind::EmptyFormula
        );
    }

    #[test]
    fn deeply_nested_formulas_are_parse_errors() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let negations = format!("{}1", "-".repeat(10_000));

        assert!(matches!(
            compile(None, &parens, CLASS_ID, empty()),
            Err(CompileErrorKind::Parse(_))
        ));
        assert!(matches!(
            compile(None, &negations, CLASS_ID, empty()),
            Err(CompileErrorKind::Parse(_))
        ));
        // A deep prefix poisons the formula it is prepended to.
        assert!(matches!(
            compile(Some(parens.as_str()), "1", CLASS_ID, empty()),
            Err(CompileErrorKind::Parse(_))
        ));
    }

    #[test]
    fn prefix_definitions_are_visible() {
        let compiled = compile(Some("bonus(x) = x + 5"), "bonus(90)", CLASS_ID, empty()).unwrap();

        assert_eq!(compiled.source(), "bonus(x) = x + 5\nbonus(90)");
        assert_eq!(compiled.evaluate(&mut context(true)), Ok(Value::Number(95.0)));
    }

    #[tokio::test]
    async fn globs_expand_to_literal_arrays() {
        let sources = with_assignments(&["hw2", "hw1", "lab1"]).await;

        let mut program = parse_formula("sum(assignments('hw*'))").unwrap();
        let callables = local_callables(&program);
        for expr in program.expressions_mut() {
            rewrite(expr, &callables, CLASS_ID, &sources).unwrap();
        }

        assert_eq!(
            program.to_string(),
            "sum(assignments([\"hw1\", \"hw2\"]))"
        );
    }

    #[tokio::test]
    async fn glob_without_matches_reads_nothing() {
        let sources = with_assignments(&["hw1"]).await;
        let compiled = compile(None, "assignments('quiz*')", CLASS_ID, sources).unwrap();

        assert_eq!(
            compiled.evaluate(&mut context(true)),
            Ok(Value::Array(vec![]))
        );
    }

    #[test]
    fn compiled_expressions_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledExpression>();
    }
}
