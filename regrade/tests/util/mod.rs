#![allow(dead_code)]

use regrade::config::WorkerConfig;
use regrade::dependency::refresh_class_dependencies;
use regrade::worker::{enqueue_class, QueueWorker};
use regrade_storage::*;
use std::sync::Arc;
use uuid::Uuid;

pub const CLASS_ID: ClassId = 1;
pub const GRADEBOOK_ID: GradebookId = 1;

pub const HW1: ColumnId = 1;
pub const HW2: ColumnId = 2;
pub const AVERAGE: ColumnId = 3;
pub const FINAL: ColumnId = 4;
pub const ABOVE_HW1: ColumnId = 5;

/// Small pages so every bulk read walks several of them.
pub const PAGE_SIZE: usize = 2;

pub fn student(n: u128) -> StudentId {
    Uuid::from_u128(n)
}

pub fn cell_id(column_id: ColumnId, student: u128, is_private: bool) -> CellId {
    column_id * 100 + student as i64 * 10 + if is_private { 1 } else { 0 }
}

pub fn column(id: ColumnId, slug: &str, expression: &str, max_score: f64) -> GradebookColumn {
    GradebookColumn {
        id,
        class_id: CLASS_ID,
        gradebook_id: GRADEBOOK_ID,
        slug: slug.to_string(),
        score_expression: Some(expression.to_string()),
        dependencies: ColumnDependencies::default(),
        max_score: Some(max_score),
    }
}

pub fn assignment_score(
    assignment_id: AssignmentId,
    slug: &str,
    student_id: StudentId,
    score: Option<f64>,
    released: bool,
) -> AssignmentScore {
    AssignmentScore {
        assignment_id,
        class_id: CLASS_ID,
        slug: slug.to_string(),
        student_id,
        score,
        released,
    }
}

/// A released, not yet computed cell for every column, student and tier.
pub fn cells_for(columns: &[GradebookColumn], students: &[u128]) -> Vec<ColumnCell> {
    let mut cells = vec![];

    for column in columns {
        for &n in students {
            for &is_private in &[true, false] {
                cells.push(ColumnCell {
                    id: cell_id(column.id, n, is_private),
                    column_id: column.id,
                    class_id: CLASS_ID,
                    gradebook_id: GRADEBOOK_ID,
                    student_id: student(n),
                    is_private,
                    column_slug: column.slug.clone(),
                    max_score: column.max_score,
                    score: None,
                    score_override: None,
                    score_override_note: None,
                    is_missing: false,
                    is_excused: false,
                    is_droppable: false,
                    released: true,
                    incomplete_values: None,
                    is_recalculating: false,
                });
            }
        }
    }

    cells
}

/// Two homeworks, their average, a final grade on top of the average, and a count of
/// homeworks at or above the student's first homework.
///
/// - Student 1 scored 8 and 9. The second homework is not released to students yet.
/// - Student 2 scored 6 and has no score for the second homework.
pub fn class_snapshot() -> GradebookSnapshot {
    let columns = vec![
        column(HW1, "hw1", "assignments('hw1')", 10.0),
        column(HW2, "hw2", "assignments('hw2')", 10.0),
        column(AVERAGE, "average", "mean(gradebook_columns('hw*'))", 100.0),
        column(FINAL, "final", "gradebook_columns('average') + 5", 100.0),
        column(
            ABOVE_HW1,
            "above_hw1",
            "countif(gradebook_columns('hw*'), above(c) = c >= assignments('hw1'))",
            2.0,
        ),
    ];

    GradebookSnapshot {
        gradebooks: vec![Gradebook {
            id: GRADEBOOK_ID,
            class_id: CLASS_ID,
            expression_prefix: None,
            incomplete_values_policy: IncompleteValuesPolicy::AssumeZero,
        }],
        assignments: vec![
            Assignment {
                id: 1,
                class_id: CLASS_ID,
                slug: "hw1".to_string(),
                total_points: Some(10.0),
            },
            Assignment {
                id: 2,
                class_id: CLASS_ID,
                slug: "hw2".to_string(),
                total_points: Some(10.0),
            },
        ],
        assignment_scores: vec![
            assignment_score(1, "hw1", student(1), Some(8.0), true),
            assignment_score(2, "hw2", student(1), Some(9.0), false),
            assignment_score(1, "hw1", student(2), Some(6.0), true),
        ],
        cells: cells_for(&columns, &[1, 2]),
        columns,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryQueue>,
    pub worker: QueueWorker,
}

impl Harness {
    pub async fn new(snapshot: GradebookSnapshot) -> Harness {
        Harness::with_config(snapshot, config()).await
    }

    pub async fn with_config(snapshot: GradebookSnapshot, config: WorkerConfig) -> Harness {
        let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
        let queue = Arc::new(InMemoryQueue::new());

        refresh_class_dependencies(&*store, CLASS_ID, PAGE_SIZE)
            .await
            .expect("dependencies should refresh");

        let worker = QueueWorker::new(store.clone(), queue.clone(), config);

        Harness {
            store,
            queue,
            worker,
        }
    }

    /// Like [`Harness::new`], but the worker goes through a [`FaultyStore`].
    pub async fn faulty(snapshot: GradebookSnapshot) -> (Harness, Arc<FaultyStore>) {
        Harness::faulty_with_config(snapshot, config()).await
    }

    pub async fn faulty_with_config(
        snapshot: GradebookSnapshot,
        config: WorkerConfig,
    ) -> (Harness, Arc<FaultyStore>) {
        let mut harness = Harness::with_config(snapshot, config.clone()).await;
        let faulty = Arc::new(FaultyStore::new(harness.store.clone()));
        harness.worker = QueueWorker::new(faulty.clone(), harness.queue.clone(), config);
        (harness, faulty)
    }

    /// Sends one request straight to the queue, bypassing `enqueue_class`.
    pub async fn send(&self, request: &RecalcRequest) {
        self.queue
            .send(
                &self.worker.config().queue_name,
                serde_json::to_value(request).expect("request encodes"),
            )
            .await
            .expect("send should succeed");
    }

    pub async fn enqueue_all(&self) -> usize {
        enqueue_class(
            &*self.store,
            &*self.queue,
            &self.worker.config().queue_name,
            CLASS_ID,
            PAGE_SIZE,
        )
        .await
        .expect("enqueue should succeed")
    }

    pub fn cell(&self, column_id: ColumnId, student: u128, is_private: bool) -> ColumnCell {
        self.store
            .cell(cell_id(column_id, student, is_private))
            .expect("store readable")
            .expect("cell exists")
    }

    pub fn score(&self, column_id: ColumnId, student: u128, is_private: bool) -> Option<f64> {
        self.cell(column_id, student, is_private).score
    }
}

pub fn config() -> WorkerConfig {
    WorkerConfig {
        page_size: PAGE_SIZE,
        ..WorkerConfig::default()
    }
}

pub fn assert_close(actual: Option<f64>, expected: f64) {
    match actual {
        Some(actual) => assert!(
            (actual - expected).abs() < 1e-9,
            "{} != {}",
            actual,
            expected
        ),
        None => panic!("expected {}, got no score", expected),
    }
}

/// Delegates to an [`InMemoryStore`] and injects faults on demand.
pub struct FaultyStore {
    pub inner: Arc<InMemoryStore>,
    /// Applied as an instructor override right before the next write to that cell's row.
    pub edit_before_write: std::sync::Mutex<Option<(CellId, f64)>>,
    pub fail_score_reads: std::sync::atomic::AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> FaultyStore {
        FaultyStore {
            inner,
            edit_before_write: std::sync::Mutex::new(None),
            fail_score_reads: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl GradebookStore for FaultyStore {
    async fn gradebook(&self, gradebook_id: GradebookId) -> StorageResult<Option<Gradebook>> {
        self.inner.gradebook(gradebook_id).await
    }

    async fn columns_by_id(&self, column_ids: &[ColumnId]) -> StorageResult<Vec<GradebookColumn>> {
        self.inner.columns_by_id(column_ids).await
    }

    async fn cells_by_id(&self, cell_ids: &[CellId]) -> StorageResult<Vec<ColumnCell>> {
        self.inner.cells_by_id(cell_ids).await
    }

    async fn class_columns(
        &self,
        class_id: ClassId,
        page: PageRequest,
    ) -> StorageResult<Page<GradebookColumn>> {
        self.inner.class_columns(class_id, page).await
    }

    async fn class_assignments(
        &self,
        class_id: ClassId,
        page: PageRequest,
    ) -> StorageResult<Page<Assignment>> {
        self.inner.class_assignments(class_id, page).await
    }

    async fn assignment_scores(
        &self,
        class_id: ClassId,
        slugs: &[String],
        students: &[StudentId],
        page: PageRequest,
    ) -> StorageResult<Page<AssignmentScore>> {
        if self
            .fail_score_reads
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StorageErrorKind::Backend("connection reset".to_string()));
        }
        self.inner
            .assignment_scores(class_id, slugs, students, page)
            .await
    }

    async fn column_cells(
        &self,
        class_id: ClassId,
        slugs: &[String],
        students: &[StudentId],
        page: PageRequest,
    ) -> StorageResult<Page<ColumnCell>> {
        self.inner.column_cells(class_id, slugs, students, page).await
    }

    async fn row_states(&self, keys: &[RowKey]) -> StorageResult<Vec<RowRecalcState>> {
        self.inner.row_states(keys).await
    }

    async fn acknowledge_cell(&self, cell_id: CellId) -> StorageResult<()> {
        self.inner.acknowledge_cell(cell_id).await
    }

    async fn apply_row_updates(
        &self,
        key: RowKey,
        expected_version: Version,
        updates: &[CellUpdate],
    ) -> StorageResult<CasResult> {
        let edit = {
            let mut pending = self
                .edit_before_write
                .lock()
                .expect("fault lock should not be poisoned");
            match *pending {
                Some((cell_id, _)) if updates.iter().any(|update| update.cell_id == cell_id) => {
                    pending.take()
                }
                _ => None,
            }
        };
        if let Some((cell_id, score_override)) = edit {
            self.inner
                .set_override(cell_id, Some(score_override), Some("regraded".to_string()))?;
        }

        self.inner
            .apply_row_updates(key, expected_version, updates)
            .await
    }

    async fn mark_row_dirty(&self, key: RowKey) -> StorageResult<()> {
        self.inner.mark_row_dirty(key).await
    }

    async fn update_column_dependencies(
        &self,
        column_id: ColumnId,
        dependencies: ColumnDependencies,
    ) -> StorageResult<()> {
        self.inner
            .update_column_dependencies(column_id, dependencies)
            .await
    }
}
