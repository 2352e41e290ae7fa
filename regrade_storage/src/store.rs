//! The persistent store contract.
//!
//! Reads are paged with a stable order so a caller can walk a large class in bounded chunks.
//! The only multi-record write is [`GradebookStore::apply_row_updates`], which is a
//! compare-and-swap on the row version: it applies every update or none of them.
//!
//! An empty slug or student filter matches everything.

use async_trait::async_trait;

use crate::model::*;
use crate::StorageResult;

#[async_trait]
pub trait GradebookStore: Send + Sync {
    async fn gradebook(&self, gradebook_id: GradebookId) -> StorageResult<Option<Gradebook>>;

    async fn columns_by_id(&self, column_ids: &[ColumnId]) -> StorageResult<Vec<GradebookColumn>>;

    /// The cells among `cell_ids` that still exist. Ids without a cell are left out.
    async fn cells_by_id(&self, cell_ids: &[CellId]) -> StorageResult<Vec<ColumnCell>>;

    /// Columns of a class, ordered by id.
    async fn class_columns(
        &self,
        class_id: ClassId,
        page: PageRequest,
    ) -> StorageResult<Page<GradebookColumn>>;

    /// Assignments of a class, ordered by id.
    async fn class_assignments(
        &self,
        class_id: ClassId,
        page: PageRequest,
    ) -> StorageResult<Page<Assignment>>;

    /// Scores for the given assignment slugs and students of one class.
    async fn assignment_scores(
        &self,
        class_id: ClassId,
        slugs: &[String],
        students: &[StudentId],
        page: PageRequest,
    ) -> StorageResult<Page<AssignmentScore>>;

    /// Cells of the given column slugs and students of one class, both privacy tiers.
    async fn column_cells(
        &self,
        class_id: ClassId,
        slugs: &[String],
        students: &[StudentId],
        page: PageRequest,
    ) -> StorageResult<Page<ColumnCell>>;

    /// Row states for the given keys. A row that was never written reports version 0.
    async fn row_states(&self, keys: &[RowKey]) -> StorageResult<Vec<RowRecalcState>>;

    /// Clears `is_recalculating` on one cell without touching its score.
    async fn acknowledge_cell(&self, cell_id: CellId) -> StorageResult<()>;

    /// Applies every update to the row if its version still equals `expected_version`. On
    /// success the version is incremented and the row is no longer dirty or recalculating.
    async fn apply_row_updates(
        &self,
        key: RowKey,
        expected_version: Version,
        updates: &[CellUpdate],
    ) -> StorageResult<CasResult>;

    async fn mark_row_dirty(&self, key: RowKey) -> StorageResult<()>;

    async fn update_column_dependencies(
        &self,
        column_id: ColumnId,
        dependencies: ColumnDependencies,
    ) -> StorageResult<()>;
}
