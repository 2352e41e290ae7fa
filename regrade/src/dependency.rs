//! Dependency extraction.
//!
//! A column's formula is parsed, never executed, to find the assignments and columns it reads.
//! The literal keys of every dependency call are resolved to ids through the class universe and
//! stored on the column, where the scheduler and the prefetch step read them.

pub mod schedule;

use crate::ErrorKind;
use regrade_computation::compiler::formula_text;
use regrade_computation::{CompileErrorKind, DependencySourceMap};
use regrade_parser::{parse_formula, Expression, Program};
use regrade_storage::{
    ClassId, ColumnDependencies, ColumnId, DependencyKind, GradebookColumn, GradebookStore,
    PageRequest,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, error, info};

/// The literal keys of every dependency call in a program, per kind. Globs are kept as written.
pub fn extract_dependency_keys(program: &Program) -> BTreeMap<DependencyKind, BTreeSet<String>> {
    let mut result = BTreeMap::new();

    for expr in program.expressions() {
        extract_keys_inner(expr, &mut result);
    }

    result
}

fn extract_keys_inner(expr: &Expression, result: &mut BTreeMap<DependencyKind, BTreeSet<String>>) {
    if let Expression::Fn(name, args) = expr {
        if let Some(kind) = DependencyKind::from_function_name(name) {
            let keys = result.entry(kind).or_insert_with(BTreeSet::new);
            for arg in args {
                match arg {
                    Expression::ValueString(key) => {
                        keys.insert(key.clone());
                    }
                    Expression::Array(items) => {
                        keys.extend(items.iter().filter_map(|item| match item {
                            Expression::ValueString(key) => Some(key.clone()),
                            _ => None,
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    for child in expr.children() {
        extract_keys_inner(child, result);
    }
}

/// Resolves extracted keys to ids, expanding globs. Keys that name nothing are dropped.
pub fn resolve_dependencies(
    keys: &BTreeMap<DependencyKind, BTreeSet<String>>,
    class_id: ClassId,
    sources: &DependencySourceMap,
) -> ColumnDependencies {
    let mut dependencies = ColumnDependencies::default();

    for (kind, keys) in keys {
        let mut slugs = vec![];
        for key in keys {
            if key.contains('*') {
                slugs.extend(sources.expand_key(*kind, key, class_id));
            } else {
                slugs.push(key.clone());
            }
        }

        let ids: BTreeSet<i64> = sources.ids_for(*kind, class_id, &slugs).into_iter().collect();
        *dependencies.ids_mut(*kind) = ids.into_iter().collect();
    }

    dependencies
}

/// Every column of a class, walking the store page by page.
pub async fn load_class_columns(
    store: &dyn GradebookStore,
    class_id: ClassId,
    page_size: usize,
) -> Result<Vec<GradebookColumn>, ErrorKind> {
    let mut columns = vec![];
    let mut request = Some(PageRequest::first(page_size));

    while let Some(page) = request {
        let page = store.class_columns(class_id, page).await?;
        columns.extend(page.items);
        request = page.next;
    }

    Ok(columns)
}

/// Recomputes and stores the dependencies of one column. Returns whether they changed.
///
/// A formula that would make the column reachable from itself is rejected with
/// [`ErrorKind::DependencyCycle`] and the stored dependencies stay as they were.
pub async fn refresh_column_dependencies(
    store: &dyn GradebookStore,
    column_id: ColumnId,
    page_size: usize,
) -> Result<bool, ErrorKind> {
    let column = store
        .columns_by_id(&[column_id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ErrorKind::NotFound(format!("column {}", column_id)))?;

    let mut sources = DependencySourceMap::standard(page_size);
    sources.load_universe(column.class_id, store).await?;
    let class_columns = load_class_columns(store, column.class_id, page_size).await?;

    refresh_loaded_column(store, &column, &class_columns, &sources).await
}

/// Recomputes the dependencies of every column in a class, e.g. after an assignment or column
/// was added, renamed or removed. Returns how many columns changed.
///
/// A column whose formula no longer parses or would close a cycle keeps its stored dependencies
/// and is logged; the others are still refreshed.
pub async fn refresh_class_dependencies(
    store: &dyn GradebookStore,
    class_id: ClassId,
    page_size: usize,
) -> Result<usize, ErrorKind> {
    let mut sources = DependencySourceMap::standard(page_size);
    sources.load_universe(class_id, store).await?;

    let mut class_columns = load_class_columns(store, class_id, page_size).await?;
    let mut changed = 0;

    for index in 0..class_columns.len() {
        let column = class_columns[index].clone();
        match refresh_loaded_column(store, &column, &class_columns, &sources).await {
            Ok(true) => {
                changed += 1;
                // Later cycle checks must see the new edges.
                if let Some(updated) = store.columns_by_id(&[column.id]).await?.into_iter().next()
                {
                    class_columns[index] = updated;
                }
            }
            Ok(false) => {}
            Err(e @ ErrorKind::Compile(_)) | Err(e @ ErrorKind::DependencyCycle { .. }) => {
                error!(column_id = column.id, error = %e, "Could not refresh column dependencies");
            }
            Err(e) => return Err(e),
        }
    }

    info!(class_id, changed, "Refreshed class dependencies");
    Ok(changed)
}

async fn refresh_loaded_column(
    store: &dyn GradebookStore,
    column: &GradebookColumn,
    class_columns: &[GradebookColumn],
    sources: &DependencySourceMap,
) -> Result<bool, ErrorKind> {
    let dependencies = match column.score_expression.as_deref() {
        None => ColumnDependencies::default(),
        Some(expression) => {
            let prefix = store
                .gradebook(column.gradebook_id)
                .await?
                .and_then(|gradebook| gradebook.expression_prefix);
            let program = parse_formula(&formula_text(prefix.as_deref(), expression))
                .map_err(CompileErrorKind::from)?;

            resolve_dependencies(&extract_dependency_keys(&program), column.class_id, sources)
        }
    };

    if let Some(path) = find_cycle(column.id, &dependencies, class_columns) {
        return Err(ErrorKind::DependencyCycle {
            column_id: column.id,
            path,
        });
    }

    if dependencies == column.dependencies {
        debug!(column_id = column.id, "Column dependencies unchanged");
        return Ok(false);
    }

    store
        .update_column_dependencies(column.id, dependencies.clone())
        .await?;
    info!(
        column_id = column.id,
        assignments = ?dependencies.assignments,
        gradebook_columns = ?dependencies.gradebook_columns,
        "Updated column dependencies"
    );

    Ok(true)
}

/// Looks for a path from `column_id` back to itself if its column dependencies were replaced by
/// `dependencies`. Returns the path, starting at the first dependency.
pub fn find_cycle(
    column_id: ColumnId,
    dependencies: &ColumnDependencies,
    class_columns: &[GradebookColumn],
) -> Option<Vec<ColumnId>> {
    let reads: HashMap<ColumnId, &[ColumnId]> = class_columns
        .iter()
        .map(|column| (column.id, column.dependencies.gradebook_columns.as_slice()))
        .collect();

    let mut visited = BTreeSet::new();
    let mut path = vec![];

    for &start in &dependencies.gradebook_columns {
        if reaches(start, column_id, &reads, &mut visited, &mut path) {
            return Some(path);
        }
    }

    None
}

fn reaches(
    current: ColumnId,
    target: ColumnId,
    reads: &HashMap<ColumnId, &[ColumnId]>,
    visited: &mut BTreeSet<ColumnId>,
    path: &mut Vec<ColumnId>,
) -> bool {
    path.push(current);

    if current == target {
        return true;
    }

    if visited.insert(current) {
        // The target's own stored edges are about to be replaced, so they are never followed.
        for &next in reads.get(&current).copied().unwrap_or(&[]) {
            if reaches(next, target, reads, visited, path) {
                return true;
            }
        }
    }

    path.pop();
    false
}
