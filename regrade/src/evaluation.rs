//! Evaluation of one scheduled batch.
//!
//! A batch is evaluated against its own `DependencySourceMap`, prefetched from the store after
//! every earlier batch was written, so a column always sees the values computed for the columns
//! it reads. Each distinct column is compiled once and then evaluated for every requested cell on
//! the rayon pool. Results are written per student row with a version check.

use crate::dependency::schedule::Batch;
use crate::row_updater::{self, RowUpdates, RowWriteOutcome};
use crate::ErrorKind;
use futures::future::join_all;
use rayon::prelude::*;
use regrade_computation::{
    compile, CompiledExpression, DependencyKey, DependencySourceMap,
    EvalErrorKind, ExprDependencyInstance, ExpressionContext, Value,
};
use regrade_storage::{
    CellId, CellUpdate, ClassId, ColumnCell, ColumnId, DependencyKind, Gradebook, GradebookColumn,
    GradebookId, GradebookStore, IncompleteValuesPolicy, RecalcRequest, RowKey,
    StudentId, Version,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A formula of exactly this text marks a column whose values are imported, not computed.
pub const IMPORTED_FORMULA: &str = "importCSV";

/// What happened to one requested cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOutcome {
    /// A score was computed and committed.
    Written,
    /// Compiling or evaluating failed. The cell was committed as missing.
    Failed,
    /// Nothing to compute. Only `is_recalculating` was cleared.
    Acknowledged,
    /// The row changed while the batch ran. Nothing was written.
    Conflicted,
    /// The store rejected the write.
    WriteFailed,
    /// The cell was deleted, or no longer matches the request's column and row. Nothing was
    /// written and nothing ever will be.
    Gone,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub written: usize,
    pub failed: usize,
    pub acknowledged: usize,
    pub conflicted: usize,
    pub write_failed: usize,
    pub gone: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: CellOutcome) {
        match outcome {
            CellOutcome::Written => self.written += 1,
            CellOutcome::Failed => self.failed += 1,
            CellOutcome::Acknowledged => self.acknowledged += 1,
            CellOutcome::Conflicted => self.conflicted += 1,
            CellOutcome::WriteFailed => self.write_failed += 1,
            CellOutcome::Gone => self.gone += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.written
            + self.failed
            + self.acknowledged
            + self.conflicted
            + self.write_failed
            + self.gone
    }
}

enum ColumnPlan {
    Skip,
    Compiled {
        expression: CompiledExpression,
        policy: IncompleteValuesPolicy,
        has_dependencies: bool,
    },
    Invalid,
}

struct Job {
    request: RecalcRequest,
    expression: CompiledExpression,
    policy: IncompleteValuesPolicy,
    has_dependencies: bool,
}

pub struct CellEvaluator {
    store: Arc<dyn GradebookStore>,
    page_size: usize,
}

impl CellEvaluator {
    pub fn new(store: Arc<dyn GradebookStore>, page_size: usize) -> Self {
        CellEvaluator { store, page_size }
    }

    /// Evaluates and writes every cell of `batch`, calling `on_complete` once per request.
    ///
    /// Only a failed read aborts the batch, before anything is written. Every other failure
    /// is reported per cell. Requests for cells that no longer exist are reported as
    /// [`CellOutcome::Gone`] so that they never hold back the rest of their row.
    pub async fn evaluate_batch<F>(
        &self,
        batch: &Batch,
        columns: &HashMap<ColumnId, GradebookColumn>,
        mut on_complete: F,
    ) -> Result<BatchReport, ErrorKind>
    where
        F: FnMut(&RecalcRequest, CellOutcome),
    {
        let store = &*self.store;

        // Versions are read before anything is computed so that an edit made meanwhile wins.
        let row_keys: Vec<RowKey> = batch
            .requests
            .iter()
            .map(RecalcRequest::row_key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let versions: HashMap<RowKey, Version> = store
            .row_states(&row_keys)
            .await?
            .into_iter()
            .map(|state| (state.key, state.version))
            .collect();

        let mut report = BatchReport::default();
        let gone = self.gone_cells(batch).await?;
        for request in batch
            .requests
            .iter()
            .filter(|request| gone.contains(&request.cell_id))
        {
            warn!(
                cell_id = request.cell_id,
                column_id = request.column_id,
                student_id = %request.student_id,
                "Cell no longer exists, dropping request"
            );
            report.record(CellOutcome::Gone);
            on_complete(request, CellOutcome::Gone);
        }

        let sources = Arc::new(self.prefetch(batch, columns).await?);
        let gradebooks = self.gradebooks(batch).await?;
        let plans = plan_columns(batch, columns, &gradebooks, &sources);

        let mut acknowledgements = vec![];
        let mut jobs = vec![];
        let mut updates = RowUpdates::default();
        let mut intended: HashMap<CellId, CellOutcome> = HashMap::new();

        for request in &batch.requests {
            if gone.contains(&request.cell_id) {
                continue;
            }
            match plans.get(&request.column_id) {
                Some(ColumnPlan::Compiled {
                    expression,
                    policy,
                    has_dependencies,
                }) => jobs.push(Job {
                    request: *request,
                    expression: expression.clone(),
                    policy: *policy,
                    has_dependencies: *has_dependencies,
                }),
                Some(ColumnPlan::Invalid) => {
                    updates.push(request.row_key(), missing_update(request.cell_id));
                    intended.insert(request.cell_id, CellOutcome::Failed);
                }
                Some(ColumnPlan::Skip) | None => acknowledgements.push(*request),
            }
        }

        for (request, update, outcome) in evaluate_jobs(jobs).await? {
            updates.push(request.row_key(), update);
            intended.insert(request.cell_id, outcome);
        }

        for request in &acknowledgements {
            let outcome = match store.acknowledge_cell(request.cell_id).await {
                Ok(()) => CellOutcome::Acknowledged,
                Err(e) => {
                    warn!(cell_id = request.cell_id, error = %e, "Could not acknowledge cell");
                    CellOutcome::WriteFailed
                }
            };
            report.record(outcome);
            on_complete(request, outcome);
        }

        let writes = join_all(updates.rows().map(|(key, cell_updates)| {
            let expected = versions.get(key).copied().unwrap_or(0);
            async move {
                let outcome = row_updater::write_row(store, *key, expected, cell_updates).await;
                (*key, outcome)
            }
        }))
        .await;
        let row_outcomes: HashMap<RowKey, RowWriteOutcome> = writes.into_iter().collect();

        for request in &batch.requests {
            let intended = match intended.get(&request.cell_id) {
                Some(outcome) => *outcome,
                None => continue,
            };
            let outcome = match row_outcomes.get(&request.row_key()) {
                Some(RowWriteOutcome::Committed { .. }) => intended,
                Some(RowWriteOutcome::Conflicted { .. }) => CellOutcome::Conflicted,
                Some(RowWriteOutcome::Failed(_)) | None => CellOutcome::WriteFailed,
            };
            report.record(outcome);
            on_complete(request, outcome);
        }

        debug!(?report, "Batch finished");
        Ok(report)
    }

    /// Requested cells that were deleted, or that now sit in another column or row than the
    /// request says.
    async fn gone_cells(&self, batch: &Batch) -> Result<HashSet<CellId>, ErrorKind> {
        let cell_ids: Vec<CellId> = batch.requests.iter().map(|r| r.cell_id).collect();
        let cells: HashMap<CellId, ColumnCell> = self
            .store
            .cells_by_id(&cell_ids)
            .await?
            .into_iter()
            .map(|cell| (cell.id, cell))
            .collect();

        Ok(batch
            .requests
            .iter()
            .filter(|request| match cells.get(&request.cell_id) {
                Some(cell) => {
                    cell.column_id != request.column_id || cell.row_key() != request.row_key()
                }
                None => true,
            })
            .map(|request| request.cell_id)
            .collect())
    }

    /// Builds the batch's sources and prefetches every value its columns declared.
    async fn prefetch(
        &self,
        batch: &Batch,
        columns: &HashMap<ColumnId, GradebookColumn>,
    ) -> Result<DependencySourceMap, ErrorKind> {
        let store = &*self.store;
        let mut sources = DependencySourceMap::standard(self.page_size);

        let classes: BTreeSet<ClassId> = batch.requests.iter().map(|r| r.class_id).collect();
        for class_id in classes {
            sources
                .load_universe(class_id, store)
                .await
                .map_err(ErrorKind::Prefetch)?;
        }

        // One instance per (kind, class, student), covering every slug its columns read.
        let mut wanted: BTreeMap<(DependencyKind, ClassId, StudentId), BTreeSet<String>> =
            BTreeMap::new();
        for request in &batch.requests {
            let column = match columns.get(&request.column_id) {
                Some(column) => column,
                None => continue,
            };
            for kind in DependencyKind::ALL.iter().copied() {
                let slugs =
                    sources.slugs_for(kind, request.class_id, column.dependencies.ids(kind));
                if !slugs.is_empty() {
                    wanted
                        .entry((kind, request.class_id, request.student_id))
                        .or_default()
                        .extend(slugs);
                }
            }
        }

        let mut instances: HashMap<DependencyKind, Vec<ExprDependencyInstance>> = HashMap::new();
        for ((kind, class_id, student_id), slugs) in wanted {
            instances
                .entry(kind)
                .or_default()
                .push(ExprDependencyInstance {
                    class_id,
                    key: DependencyKey::Many(slugs.into_iter().collect()),
                    student_id,
                });
        }

        sources
            .prefetch(&instances, store)
            .await
            .map_err(ErrorKind::Prefetch)?;

        Ok(sources)
    }

    async fn gradebooks(&self, batch: &Batch) -> Result<HashMap<GradebookId, Gradebook>, ErrorKind> {
        let ids: BTreeSet<GradebookId> = batch.requests.iter().map(|r| r.gradebook_id).collect();
        let mut gradebooks = HashMap::new();

        for id in ids {
            if let Some(gradebook) = self.store.gradebook(id).await? {
                gradebooks.insert(id, gradebook);
            }
        }

        Ok(gradebooks)
    }
}

fn plan_columns(
    batch: &Batch,
    columns: &HashMap<ColumnId, GradebookColumn>,
    gradebooks: &HashMap<GradebookId, Gradebook>,
    sources: &Arc<DependencySourceMap>,
) -> HashMap<ColumnId, ColumnPlan> {
    let mut plans = HashMap::new();

    for column_id in &batch.column_ids {
        let column = match columns.get(column_id) {
            Some(column) => column,
            None => continue,
        };

        let expression = match column.score_expression.as_deref().map(str::trim) {
            None | Some("") | Some(IMPORTED_FORMULA) => {
                plans.insert(*column_id, ColumnPlan::Skip);
                continue;
            }
            Some(expression) => expression,
        };

        let gradebook = gradebooks.get(&column.gradebook_id);
        let prefix = gradebook.and_then(|gradebook| gradebook.expression_prefix.as_deref());

        let plan = match compile(prefix, expression, column.class_id, sources.clone()) {
            Ok(compiled) => ColumnPlan::Compiled {
                expression: compiled,
                policy: gradebook
                    .map(|gradebook| gradebook.incomplete_values_policy)
                    .unwrap_or_default(),
                has_dependencies: !column.dependencies.is_empty(),
            },
            Err(e) => {
                error!(
                    column_id = column.id,
                    expression,
                    error = %e,
                    "Could not compile column formula"
                );
                ColumnPlan::Invalid
            }
        };
        plans.insert(*column_id, plan);
    }

    plans
}

/// Runs every job on the rayon pool, off the async runtime.
async fn evaluate_jobs(
    jobs: Vec<Job>,
) -> Result<Vec<(RecalcRequest, CellUpdate, CellOutcome)>, ErrorKind> {
    if jobs.is_empty() {
        return Ok(vec![]);
    }

    let results = tokio::task::spawn_blocking(move || {
        jobs.into_par_iter()
            .map(|job| {
                let (update, outcome) = evaluate_cell(&job);
                (job.request, update, outcome)
            })
            .collect::<Vec<_>>()
    })
    .await?;

    Ok(results)
}

fn evaluate_cell(job: &Job) -> (CellUpdate, CellOutcome) {
    let request = &job.request;
    let mut context = ExpressionContext::new(
        request.student_id,
        request.class_id,
        request.is_private,
        job.policy,
    );

    match job.expression.evaluate(&mut context) {
        Ok(value) => {
            let score = interpret_result(&value);
            let update = CellUpdate {
                cell_id: request.cell_id,
                score,
                is_missing: !job.has_dependencies && score.is_none(),
                incomplete_values: std::mem::take(&mut context.incomplete_values).into_option(),
            };
            (update, CellOutcome::Written)
        }
        Err(e) => {
            log_eval_error(request, job.expression.source(), &e);
            (missing_update(request.cell_id), CellOutcome::Failed)
        }
    }
}

fn log_eval_error(request: &RecalcRequest, expression: &str, e: &EvalErrorKind) {
    error!(
        column_id = request.column_id,
        student_id = %request.student_id,
        expression,
        error = %e,
        "Could not evaluate column formula"
    );
}

fn missing_update(cell_id: CellId) -> CellUpdate {
    CellUpdate {
        cell_id,
        score: None,
        is_missing: true,
        incomplete_values: None,
    }
}

/// The score a formula's value stands for. Arrays count by their last entry.
pub fn interpret_result(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => Some(*n),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Cell(cell) => cell.effective_score(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Array(values) => return values.last().and_then(interpret_result),
        Value::Undefined | Value::Function(_) => None,
    };

    score.filter(|score| score.is_finite())
}
