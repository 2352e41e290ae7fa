use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ClassId = i64;
pub type GradebookId = i64;
pub type ColumnId = i64;
pub type AssignmentId = i64;
pub type CellId = i64;
pub type StudentId = Uuid;
pub type MessageId = i64;

/// The row version is a monotonically increasing counter which is incremented every time a row
/// write is accepted, including instructor edits.
pub type Version = u64;

/// The two kinds of inputs a formula can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Assignments,
    GradebookColumns,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 2] =
        [DependencyKind::Assignments, DependencyKind::GradebookColumns];

    /// The formula function that reads this kind of input.
    pub fn function_name(self) -> &'static str {
        match self {
            DependencyKind::Assignments => "assignments",
            DependencyKind::GradebookColumns => "gradebook_columns",
        }
    }

    pub fn from_function_name(name: &str) -> Option<DependencyKind> {
        DependencyKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.function_name() == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDependencies {
    #[serde(default)]
    pub assignments: Vec<AssignmentId>,
    #[serde(default)]
    pub gradebook_columns: Vec<ColumnId>,
}

impl ColumnDependencies {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.gradebook_columns.is_empty()
    }

    pub fn ids(&self, kind: DependencyKind) -> &[i64] {
        match kind {
            DependencyKind::Assignments => &self.assignments,
            DependencyKind::GradebookColumns => &self.gradebook_columns,
        }
    }

    pub fn ids_mut(&mut self, kind: DependencyKind) -> &mut Vec<i64> {
        match kind {
            DependencyKind::Assignments => &mut self.assignments,
            DependencyKind::GradebookColumns => &mut self.gradebook_columns,
        }
    }
}

/// How `mean` treats a missing cell that was not excused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteValuesPolicy {
    AssumeZero,
    AssumeMax,
    ReportOnly,
}

impl Default for IncompleteValuesPolicy {
    fn default() -> Self {
        IncompleteValuesPolicy::AssumeZero
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradebook {
    pub id: GradebookId,
    pub class_id: ClassId,
    #[serde(default)]
    pub expression_prefix: Option<String>,
    #[serde(default)]
    pub incomplete_values_policy: IncompleteValuesPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradebookColumn {
    pub id: ColumnId,
    pub class_id: ClassId,
    pub gradebook_id: GradebookId,
    pub slug: String,
    #[serde(default)]
    pub score_expression: Option<String>,
    #[serde(default)]
    pub dependencies: ColumnDependencies,
    #[serde(default)]
    pub max_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub class_id: ClassId,
    pub slug: String,
    #[serde(default)]
    pub total_points: Option<f64>,
}

/// A student's current best total for one assignment, whichever tier reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentScore {
    pub assignment_id: AssignmentId,
    pub class_id: ClassId,
    pub slug: String,
    pub student_id: StudentId,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub released: bool,
}

/// Slugs of inputs, per dependency kind. Insertion-ordered and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteKeys {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gradebook_columns: Vec<String>,
}

impl IncompleteKeys {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.gradebook_columns.is_empty()
    }

    pub fn keys(&self, kind: DependencyKind) -> &[String] {
        match kind {
            DependencyKind::Assignments => &self.assignments,
            DependencyKind::GradebookColumns => &self.gradebook_columns,
        }
    }

    pub fn record(&mut self, kind: DependencyKind, slug: &str) {
        let keys = match kind {
            DependencyKind::Assignments => &mut self.assignments,
            DependencyKind::GradebookColumns => &mut self.gradebook_columns,
        };

        if !keys.iter().any(|existing| existing == slug) {
            keys.push(slug.to_string());
        }
    }

    pub fn union(&mut self, other: &IncompleteKeys) {
        for kind in DependencyKind::ALL.iter().copied() {
            for slug in other.keys(kind) {
                self.record(kind, slug);
            }
        }
    }
}

/// The advisory stored next to a computed score, listing the inputs that were missing or
/// withheld when it was computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteValues {
    #[serde(default, skip_serializing_if = "IncompleteKeys::is_empty")]
    pub missing: IncompleteKeys,
    #[serde(default, skip_serializing_if = "IncompleteKeys::is_empty")]
    pub not_released: IncompleteKeys,
}

impl IncompleteValues {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.not_released.is_empty()
    }

    /// `None` when there is nothing to report, which is what gets persisted.
    pub fn into_option(self) -> Option<IncompleteValues> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// The per-student materialized value of one column in one privacy tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCell {
    pub id: CellId,
    pub column_id: ColumnId,
    pub class_id: ClassId,
    pub gradebook_id: GradebookId,
    pub student_id: StudentId,
    pub is_private: bool,
    pub column_slug: String,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub score_override: Option<f64>,
    #[serde(default)]
    pub score_override_note: Option<String>,
    #[serde(default)]
    pub is_missing: bool,
    #[serde(default)]
    pub is_excused: bool,
    #[serde(default)]
    pub is_droppable: bool,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub incomplete_values: Option<IncompleteValues>,
    #[serde(default)]
    pub is_recalculating: bool,
}

impl ColumnCell {
    /// The override always wins over the computed or entered score.
    pub fn effective_score(&self) -> Option<f64> {
        self.score_override.or(self.score)
    }

    pub fn row_key(&self) -> RowKey {
        RowKey {
            class_id: self.class_id,
            gradebook_id: self.gradebook_id,
            student_id: self.student_id,
            is_private: self.is_private,
        }
    }
}

/// Identifies one student's gradebook row in one privacy tier. This is the unit of
/// transactional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub class_id: ClassId,
    pub gradebook_id: GradebookId,
    pub student_id: StudentId,
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecalcState {
    pub key: RowKey,
    pub dirty: bool,
    pub is_recalculating: bool,
    pub version: Version,
}

impl RowRecalcState {
    pub fn new(key: RowKey) -> RowRecalcState {
        RowRecalcState {
            key,
            dirty: false,
            is_recalculating: false,
            version: 0,
        }
    }
}

/// The outcome of evaluating one cell, as written back to the store. Applying it always clears
/// `is_recalculating`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub cell_id: CellId,
    pub score: Option<f64>,
    pub is_missing: bool,
    pub incomplete_values: Option<IncompleteValues>,
}

/// The result of a compare-and-swap row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    Committed { version: Version },
    VersionConflict { actual: Version },
}

impl CasResult {
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, CasResult::Committed { .. })
    }
}

/// The body of a recalculation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecalcRequest {
    pub class_id: ClassId,
    pub gradebook_id: GradebookId,
    pub column_id: ColumnId,
    pub student_id: StudentId,
    pub cell_id: CellId,
    pub is_private: bool,
}

impl RecalcRequest {
    pub fn row_key(&self) -> RowKey {
        RowKey {
            class_id: self.class_id,
            gradebook_id: self.gradebook_id,
            student_id: self.student_id,
            is_private: self.is_private,
        }
    }
}

impl From<&ColumnCell> for RecalcRequest {
    fn from(cell: &ColumnCell) -> Self {
        RecalcRequest {
            class_id: cell.class_id,
            gradebook_id: cell.gradebook_id,
            column_id: cell.column_id,
            student_id: cell.student_id,
            cell_id: cell.id,
            is_private: cell.is_private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub msg_id: MessageId,
    pub message: serde_json::Value,
    pub read_ct: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> PageRequest {
        PageRequest {
            offset: 0,
            limit: limit.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// The request for the following page, if there is one.
    pub next: Option<PageRequest>,
}

impl<T> Page<T> {
    /// Cuts one page out of an already-filtered, stably ordered result set.
    pub fn slice(all: Vec<T>, request: PageRequest) -> Page<T> {
        let total = all.len();
        let limit = request.limit.max(1);
        let items: Vec<T> = all.into_iter().skip(request.offset).take(limit).collect();
        let consumed = request.offset + items.len();

        Page {
            items,
            next: if consumed < total {
                Some(PageRequest {
                    offset: consumed,
                    limit,
                })
            } else {
                None
            },
        }
    }
}

/// A whole gradebook state that can be loaded into the in-memory store, e.g. from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradebookSnapshot {
    #[serde(default)]
    pub gradebooks: Vec<Gradebook>,
    #[serde(default)]
    pub columns: Vec<GradebookColumn>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub assignment_scores: Vec<AssignmentScore>,
    #[serde(default)]
    pub cells: Vec<ColumnCell>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn override_wins_over_score() {
        let cell: ColumnCell = serde_json::from_value(serde_json::json!({
            "id": 1,
            "column_id": 2,
            "class_id": 3,
            "gradebook_id": 4,
            "student_id": "00000000-0000-0000-0000-000000000001",
            "is_private": true,
            "column_slug": "hw1",
            "score": 7.0,
            "score_override": 9.5
        }))
        .unwrap();

        assert_eq!(cell.effective_score(), Some(9.5));
    }

    #[test]
    fn incomplete_keys_deduplicate_in_insertion_order() {
        let mut keys = IncompleteKeys::default();
        keys.record(DependencyKind::GradebookColumns, "hw2");
        keys.record(DependencyKind::GradebookColumns, "hw1");
        keys.record(DependencyKind::GradebookColumns, "hw2");

        let mut upstream = IncompleteKeys::default();
        upstream.record(DependencyKind::GradebookColumns, "hw3");
        upstream.record(DependencyKind::GradebookColumns, "hw1");
        keys.union(&upstream);

        assert_eq!(keys.gradebook_columns, vec!["hw2", "hw1", "hw3"]);
    }

    #[test]
    fn empty_incomplete_values_serialize_to_nothing() {
        assert_eq!(IncompleteValues::default().into_option(), None);

        let mut values = IncompleteValues::default();
        values
            .missing
            .record(DependencyKind::Assignments, "hw1");

        assert_eq!(
            serde_json::to_value(&values).unwrap(),
            serde_json::json!({"missing": {"assignments": ["hw1"]}})
        );
    }

    #[test]
    fn pages_slice_stably() {
        let first = Page::slice(vec![1, 2, 3, 4, 5], PageRequest::first(2));
        assert_eq!(first.items, vec![1, 2]);

        let next = first.next.unwrap();
        let last = Page::slice(vec![1, 2, 3, 4, 5], PageRequest { offset: 4, ..next });
        assert_eq!(last.items, vec![5]);
        assert_eq!(last.next, None);
    }
}
