//! In-memory store and queue.
//!
//! [`InMemoryStore`] and [`InMemoryQueue`] implement the storage contracts for tests, benchmarks
//! and the snapshot-driven worker command. State lives behind `std::sync` locks; nothing is
//! durable and nothing is shared across processes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::model::*;
use crate::queue::MessageQueue;
use crate::store::GradebookStore;
use crate::{StorageErrorKind, StorageResult};

fn poison_err<T>(_: PoisonError<T>) -> StorageErrorKind {
    StorageErrorKind::Poisoned
}

/// An empty filter matches everything.
fn matches_filter<T: PartialEq>(filter: &[T], value: &T) -> bool {
    filter.is_empty() || filter.contains(value)
}

#[derive(Debug, Default)]
struct StoreState {
    gradebooks: BTreeMap<GradebookId, Gradebook>,
    columns: BTreeMap<ColumnId, GradebookColumn>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    assignment_scores: BTreeMap<(AssignmentId, StudentId), AssignmentScore>,
    cells: BTreeMap<CellId, ColumnCell>,
    rows: HashMap<RowKey, RowRecalcState>,
}

impl StoreState {
    fn row_mut(&mut self, key: RowKey) -> &mut RowRecalcState {
        self.rows
            .entry(key)
            .or_insert_with(|| RowRecalcState::new(key))
    }

    fn load(&mut self, snapshot: GradebookSnapshot) {
        for gradebook in snapshot.gradebooks {
            self.gradebooks.insert(gradebook.id, gradebook);
        }
        for column in snapshot.columns {
            self.columns.insert(column.id, column);
        }
        for assignment in snapshot.assignments {
            self.assignments.insert(assignment.id, assignment);
        }
        for score in snapshot.assignment_scores {
            self.assignment_scores
                .insert((score.assignment_id, score.student_id), score);
        }
        for cell in snapshot.cells {
            self.row_mut(cell.row_key());
            self.cells.insert(cell.id, cell);
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: GradebookSnapshot) -> Self {
        let mut state = StoreState::default();
        state.load(snapshot);

        InMemoryStore {
            state: RwLock::new(state),
        }
    }

    pub fn from_json(json: &str) -> StorageResult<Self> {
        let snapshot: GradebookSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Adds (or replaces) every record of the snapshot.
    pub fn load(&self, snapshot: GradebookSnapshot) -> StorageResult<()> {
        self.state.write().map_err(poison_err)?.load(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> StorageResult<GradebookSnapshot> {
        let state = self.state.read().map_err(poison_err)?;

        Ok(GradebookSnapshot {
            gradebooks: state.gradebooks.values().cloned().collect(),
            columns: state.columns.values().cloned().collect(),
            assignments: state.assignments.values().cloned().collect(),
            assignment_scores: state.assignment_scores.values().cloned().collect(),
            cells: state.cells.values().cloned().collect(),
        })
    }

    pub fn cell(&self, cell_id: CellId) -> StorageResult<Option<ColumnCell>> {
        Ok(self
            .state
            .read()
            .map_err(poison_err)?
            .cells
            .get(&cell_id)
            .cloned())
    }

    /// Finds the cell of a column for one student and tier.
    pub fn find_cell(
        &self,
        column_id: ColumnId,
        student_id: StudentId,
        is_private: bool,
    ) -> StorageResult<Option<ColumnCell>> {
        let state = self.state.read().map_err(poison_err)?;

        Ok(state
            .cells
            .values()
            .find(|cell| {
                cell.column_id == column_id
                    && cell.student_id == student_id
                    && cell.is_private == is_private
            })
            .cloned())
    }

    pub fn column(&self, column_id: ColumnId) -> StorageResult<Option<GradebookColumn>> {
        Ok(self
            .state
            .read()
            .map_err(poison_err)?
            .columns
            .get(&column_id)
            .cloned())
    }

    /// Every cell, in id order.
    pub fn cells(&self) -> StorageResult<Vec<ColumnCell>> {
        Ok(self
            .state
            .read()
            .map_err(poison_err)?
            .cells
            .values()
            .cloned()
            .collect())
    }

    /// Instructor edit of a cell override. Bumps the row version and marks the row dirty, so any
    /// recalculation that read the old version loses its write.
    pub fn set_override(
        &self,
        cell_id: CellId,
        score_override: Option<f64>,
        note: Option<String>,
    ) -> StorageResult<Version> {
        let mut state = self.state.write().map_err(poison_err)?;

        let cell = state
            .cells
            .get_mut(&cell_id)
            .ok_or_else(|| StorageErrorKind::not_found("cell", cell_id))?;
        cell.score_override = score_override;
        cell.score_override_note = note;
        let key = cell.row_key();

        let row = state.row_mut(key);
        row.version += 1;
        row.dirty = true;

        Ok(row.version)
    }

    /// Instructor edit of a manually-entered cell score. Same version semantics as
    /// [`InMemoryStore::set_override`].
    pub fn set_score(&self, cell_id: CellId, score: Option<f64>) -> StorageResult<Version> {
        let mut state = self.state.write().map_err(poison_err)?;

        let cell = state
            .cells
            .get_mut(&cell_id)
            .ok_or_else(|| StorageErrorKind::not_found("cell", cell_id))?;
        cell.score = score;
        let key = cell.row_key();

        let row = state.row_mut(key);
        row.version += 1;
        row.dirty = true;

        Ok(row.version)
    }

    pub fn upsert_assignment_score(&self, score: AssignmentScore) -> StorageResult<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .assignment_scores
            .insert((score.assignment_id, score.student_id), score);
        Ok(())
    }

    /// Replaces a column's formula. Its dependencies must be refreshed afterwards.
    pub fn set_score_expression(
        &self,
        column_id: ColumnId,
        score_expression: Option<String>,
    ) -> StorageResult<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let column = state
            .columns
            .get_mut(&column_id)
            .ok_or_else(|| StorageErrorKind::not_found("column", column_id))?;
        column.score_expression = score_expression;
        Ok(())
    }

    /// Flags the cells as awaiting recalculation, as the enqueueing side does.
    pub fn mark_recalculating(&self, cell_ids: &[CellId]) -> StorageResult<()> {
        let mut state = self.state.write().map_err(poison_err)?;

        for cell_id in cell_ids {
            let key = match state.cells.get_mut(cell_id) {
                Some(cell) => {
                    cell.is_recalculating = true;
                    cell.row_key()
                }
                None => return Err(StorageErrorKind::not_found("cell", cell_id)),
            };
            state.row_mut(key).is_recalculating = true;
        }

        Ok(())
    }
}

#[async_trait]
impl GradebookStore for InMemoryStore {
    async fn gradebook(&self, gradebook_id: GradebookId) -> StorageResult<Option<Gradebook>> {
        Ok(self
            .state
            .read()
            .map_err(poison_err)?
            .gradebooks
            .get(&gradebook_id)
            .cloned())
    }

    async fn columns_by_id(&self, column_ids: &[ColumnId]) -> StorageResult<Vec<GradebookColumn>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(column_ids
            .iter()
            .filter_map(|id| state.columns.get(id).cloned())
            .collect())
    }

    async fn cells_by_id(&self, cell_ids: &[CellId]) -> StorageResult<Vec<ColumnCell>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(cell_ids
            .iter()
            .filter_map(|id| state.cells.get(id).cloned())
            .collect())
    }

    async fn class_columns(
        &self,
        class_id: ClassId,
        page: PageRequest,
    ) -> StorageResult<Page<GradebookColumn>> {
        let state = self.state.read().map_err(poison_err)?;
        let all = state
            .columns
            .values()
            .filter(|column| column.class_id == class_id)
            .cloned()
            .collect();
        Ok(Page::slice(all, page))
    }

    async fn class_assignments(
        &self,
        class_id: ClassId,
        page: PageRequest,
    ) -> StorageResult<Page<Assignment>> {
        let state = self.state.read().map_err(poison_err)?;
        let all = state
            .assignments
            .values()
            .filter(|assignment| assignment.class_id == class_id)
            .cloned()
            .collect();
        Ok(Page::slice(all, page))
    }

    async fn assignment_scores(
        &self,
        class_id: ClassId,
        slugs: &[String],
        students: &[StudentId],
        page: PageRequest,
    ) -> StorageResult<Page<AssignmentScore>> {
        let state = self.state.read().map_err(poison_err)?;
        let all = state
            .assignment_scores
            .values()
            .filter(|score| {
                score.class_id == class_id
                    && matches_filter(slugs, &score.slug)
                    && matches_filter(students, &score.student_id)
            })
            .cloned()
            .collect();
        Ok(Page::slice(all, page))
    }

    async fn column_cells(
        &self,
        class_id: ClassId,
        slugs: &[String],
        students: &[StudentId],
        page: PageRequest,
    ) -> StorageResult<Page<ColumnCell>> {
        let state = self.state.read().map_err(poison_err)?;
        let all = state
            .cells
            .values()
            .filter(|cell| {
                cell.class_id == class_id
                    && matches_filter(slugs, &cell.column_slug)
                    && matches_filter(students, &cell.student_id)
            })
            .cloned()
            .collect();
        Ok(Page::slice(all, page))
    }

    async fn row_states(&self, keys: &[RowKey]) -> StorageResult<Vec<RowRecalcState>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .rows
                    .get(key)
                    .copied()
                    .unwrap_or_else(|| RowRecalcState::new(*key))
            })
            .collect())
    }

    async fn acknowledge_cell(&self, cell_id: CellId) -> StorageResult<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let cell = state
            .cells
            .get_mut(&cell_id)
            .ok_or_else(|| StorageErrorKind::not_found("cell", cell_id))?;
        cell.is_recalculating = false;
        Ok(())
    }

    async fn apply_row_updates(
        &self,
        key: RowKey,
        expected_version: Version,
        updates: &[CellUpdate],
    ) -> StorageResult<CasResult> {
        let mut state = self.state.write().map_err(poison_err)?;

        let actual = state.rows.get(&key).map_or(0, |row| row.version);
        if actual != expected_version {
            tracing::debug!(
                student_id = %key.student_id,
                expected_version,
                actual,
                "row version conflict"
            );
            return Ok(CasResult::VersionConflict { actual });
        }

        // Validate everything before touching anything so a bad update leaves the row as it was.
        for update in updates {
            match state.cells.get(&update.cell_id) {
                Some(cell) if cell.row_key() == key => {}
                Some(_) => {
                    return Err(StorageErrorKind::InvalidParameter(format!(
                        "cell {} does not belong to the row being updated",
                        update.cell_id
                    )))
                }
                None => return Err(StorageErrorKind::not_found("cell", update.cell_id)),
            }
        }

        for update in updates {
            if let Some(cell) = state.cells.get_mut(&update.cell_id) {
                cell.score = update.score;
                cell.is_missing = update.is_missing;
                cell.incomplete_values = update.incomplete_values.clone();
                cell.is_recalculating = false;
            }
        }

        let row = state.row_mut(key);
        row.version += 1;
        row.dirty = false;
        row.is_recalculating = false;

        Ok(CasResult::Committed {
            version: row.version,
        })
    }

    async fn mark_row_dirty(&self, key: RowKey) -> StorageResult<()> {
        self.state.write().map_err(poison_err)?.row_mut(key).dirty = true;
        Ok(())
    }

    async fn update_column_dependencies(
        &self,
        column_id: ColumnId,
        dependencies: ColumnDependencies,
    ) -> StorageResult<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let column = state
            .columns
            .get_mut(&column_id)
            .ok_or_else(|| StorageErrorKind::not_found("column", column_id))?;
        column.dependencies = dependencies;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    message: QueueMessage,
    visible_at: DateTime<Utc>,
}

/// Archived messages kept per queue by default. Older ones are only counted.
pub const DEFAULT_ARCHIVE_RETENTION: usize = 1000;

#[derive(Debug, Default)]
struct Archive {
    recent: VecDeque<QueueMessage>,
    total: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: MessageId,
    pending: HashMap<String, BTreeMap<MessageId, QueueEntry>>,
    archived: HashMap<String, Archive>,
}

impl QueueState {
    fn push(&mut self, queue: &str, message: serde_json::Value) -> MessageId {
        self.next_id += 1;
        let msg_id = self.next_id;
        let now = Utc::now();

        self.pending.entry(queue.to_string()).or_default().insert(
            msg_id,
            QueueEntry {
                message: QueueMessage {
                    msg_id,
                    message,
                    read_ct: 0,
                    enqueued_at: now,
                },
                visible_at: now,
            },
        );

        msg_id
    }
}

#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    archive_retention: usize,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        InMemoryQueue::with_archive_retention(DEFAULT_ARCHIVE_RETENTION)
    }
}

impl InMemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that keeps only the last `retention` archived messages of each queue.
    #[must_use]
    pub fn with_archive_retention(retention: usize) -> Self {
        InMemoryQueue {
            state: Mutex::new(QueueState::default()),
            archive_retention: retention,
        }
    }

    /// Messages not yet archived or deleted, visible or not.
    pub fn pending_count(&self, queue: &str) -> StorageResult<usize> {
        let state = self.state.lock().map_err(poison_err)?;
        Ok(state.pending.get(queue).map_or(0, BTreeMap::len))
    }

    /// The most recently archived messages, oldest first.
    pub fn archived(&self, queue: &str) -> StorageResult<Vec<QueueMessage>> {
        let state = self.state.lock().map_err(poison_err)?;
        Ok(state
            .archived
            .get(queue)
            .map(|archive| archive.recent.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every message ever archived, including the ones no longer retained.
    pub fn archived_count(&self, queue: &str) -> StorageResult<usize> {
        let state = self.state.lock().map_err(poison_err)?;
        Ok(state.archived.get(queue).map_or(0, |archive| archive.total))
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn read(
        &self,
        queue: &str,
        visibility_timeout_secs: u64,
        n: usize,
    ) -> StorageResult<Vec<QueueMessage>> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let now = Utc::now();
        let hidden_until = now + Duration::seconds(visibility_timeout_secs as i64);

        let entries = match state.pending.get_mut(queue) {
            Some(entries) => entries,
            None => return Ok(vec![]),
        };

        Ok(entries
            .values_mut()
            .filter(|entry| entry.visible_at <= now)
            .take(n)
            .map(|entry| {
                entry.visible_at = hidden_until;
                entry.message.read_ct += 1;
                entry.message.clone()
            })
            .collect())
    }

    async fn archive(&self, queue: &str, msg_id: MessageId) -> StorageResult<bool> {
        let mut state = self.state.lock().map_err(poison_err)?;
        let removed = state
            .pending
            .get_mut(queue)
            .and_then(|entries| entries.remove(&msg_id));

        match removed {
            Some(entry) => {
                let archive = state.archived.entry(queue.to_string()).or_default();
                archive.total += 1;
                archive.recent.push_back(entry.message);
                while archive.recent.len() > self.archive_retention {
                    archive.recent.pop_front();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, queue: &str, msg_id: MessageId) -> StorageResult<bool> {
        let mut state = self.state.lock().map_err(poison_err)?;
        Ok(state
            .pending
            .get_mut(queue)
            .and_then(|entries| entries.remove(&msg_id))
            .is_some())
    }

    async fn send(&self, queue: &str, message: serde_json::Value) -> StorageResult<MessageId> {
        Ok(self.state.lock().map_err(poison_err)?.push(queue, message))
    }

    async fn send_batch(
        &self,
        queue: &str,
        messages: Vec<serde_json::Value>,
    ) -> StorageResult<Vec<MessageId>> {
        let mut state = self.state.lock().map_err(poison_err)?;
        Ok(messages
            .into_iter()
            .map(|message| state.push(queue, message))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use uuid::Uuid;

    const QUEUE: &str = "recalc";

    fn student() -> StudentId {
        Uuid::from_u128(7)
    }

    fn cell(id: CellId, slug: &str) -> ColumnCell {
        ColumnCell {
            id,
            column_id: id * 10,
            class_id: 1,
            gradebook_id: 2,
            student_id: student(),
            is_private: true,
            column_slug: slug.to_string(),
            max_score: Some(100.0),
            score: None,
            score_override: None,
            score_override_note: None,
            is_missing: false,
            is_excused: false,
            is_droppable: false,
            released: false,
            incomplete_values: None,
            is_recalculating: true,
        }
    }

    fn store() -> InMemoryStore {
        InMemoryStore::from_snapshot(GradebookSnapshot {
            cells: vec![cell(1, "final"), cell(2, "hw_avg")],
            ..GradebookSnapshot::default()
        })
    }

    fn update(cell_id: CellId, score: f64) -> CellUpdate {
        CellUpdate {
            cell_id,
            score: Some(score),
            is_missing: false,
            incomplete_values: None,
        }
    }

    #[tokio::test]
    async fn exactly_one_concurrent_writer_wins() {
        let store = Arc::new(store());
        let key = cell(1, "final").row_key();

        let handles: Vec<_> = (0..2)
            .map(|writer| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .apply_row_updates(key, 0, &[update(1, writer as f64)])
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_committed() {
                committed += 1;
            }
        }

        assert_eq!(committed, 1);
        let states = store.row_states(&[key]).await.unwrap();
        assert_eq!(states[0].version, 1);
    }

    #[tokio::test]
    async fn row_update_is_all_or_nothing() {
        let store = store();
        let key = cell(1, "final").row_key();

        let result = store
            .apply_row_updates(key, 0, &[update(1, 5.0), update(99, 6.0)])
            .await;

        assert!(result.is_err());
        assert_eq!(store.cell(1).unwrap().unwrap().score, None);
        assert_eq!(store.row_states(&[key]).await.unwrap()[0].version, 0);
    }

    #[tokio::test]
    async fn override_bumps_version_and_dirties_row() {
        let store = store();
        let key = cell(1, "final").row_key();

        let version = store.set_override(1, Some(88.0), Some("regrade".into())).unwrap();
        assert_eq!(version, 1);

        let state = store.row_states(&[key]).await.unwrap()[0];
        assert!(state.dirty);

        let stale = store
            .apply_row_updates(key, 0, &[update(1, 50.0)])
            .await
            .unwrap();
        assert_eq!(stale, CasResult::VersionConflict { actual: 1 });
        assert_eq!(store.cell(1).unwrap().unwrap().effective_score(), Some(88.0));
    }

    #[tokio::test]
    async fn committed_write_clears_recalculating() {
        let store = store();
        let key = cell(1, "final").row_key();

        let result = store
            .apply_row_updates(key, 0, &[update(1, 42.0), update(2, 40.0)])
            .await
            .unwrap();

        assert_eq!(result, CasResult::Committed { version: 1 });
        let written = store.cell(2).unwrap().unwrap();
        assert_eq!(written.score, Some(40.0));
        assert!(!written.is_recalculating);
    }

    #[tokio::test]
    async fn cells_are_paged_in_id_order() {
        let store = store();

        let first = store
            .column_cells(1, &[], &[student()], PageRequest::first(1))
            .await
            .unwrap();
        assert_eq!(first.items[0].id, 1);

        let second = store
            .column_cells(1, &[], &[student()], first.next.unwrap())
            .await
            .unwrap();
        assert_eq!(second.items[0].id, 2);
        assert_eq!(second.next, None);
    }

    #[tokio::test]
    async fn read_hides_messages_until_timeout() {
        let queue = InMemoryQueue::new();
        queue.send(QUEUE, serde_json::json!({"n": 1})).await.unwrap();

        assert_eq!(queue.read(QUEUE, 60, 10).await.unwrap().len(), 1);
        assert!(queue.read(QUEUE, 60, 10).await.unwrap().is_empty());
        assert_eq!(queue.pending_count(QUEUE).unwrap(), 1);
    }

    #[tokio::test]
    async fn redelivery_increments_read_count() {
        let queue = InMemoryQueue::new();
        let ids = queue
            .send_batch(QUEUE, vec![serde_json::json!(1), serde_json::json!(2)])
            .await
            .unwrap();

        queue.read(QUEUE, 0, 10).await.unwrap();
        let again = queue.read(QUEUE, 0, 1).await.unwrap();
        assert_eq!(again[0].msg_id, ids[0]);
        assert_eq!(again[0].read_ct, 2);

        assert!(queue.archive(QUEUE, ids[0]).await.unwrap());
        assert!(!queue.archive(QUEUE, ids[0]).await.unwrap());
        assert!(queue.delete(QUEUE, ids[1]).await.unwrap());
        assert_eq!(queue.pending_count(QUEUE).unwrap(), 0);
        assert_eq!(queue.archived(QUEUE).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn archive_keeps_only_the_latest_messages() {
        let queue = InMemoryQueue::with_archive_retention(3);
        let messages = (0..10).map(|n| serde_json::json!(n)).collect();
        let ids = queue.send_batch(QUEUE, messages).await.unwrap();

        for id in &ids {
            assert!(queue.archive(QUEUE, *id).await.unwrap());
        }

        assert_eq!(queue.archived_count(QUEUE).unwrap(), 10);
        let kept: Vec<MessageId> = queue
            .archived(QUEUE)
            .unwrap()
            .iter()
            .map(|message| message.msg_id)
            .collect();
        assert_eq!(kept, ids[7..].to_vec());
        assert_eq!(queue.archived_count("other").unwrap(), 0);
    }
}
