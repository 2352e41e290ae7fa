//! Per-student row writes guarded by the row version.
//!
//! Every cell computed for one row in one batch is written together. If the row changed since
//! its version was read, nothing is written and the row stays dirty so that a later pass picks it
//! up again.

use regrade_storage::{CasResult, CellUpdate, GradebookStore, RowKey, StorageErrorKind, Version};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RowWriteOutcome {
    Committed { version: Version },
    Conflicted { expected: Version, actual: Version },
    Failed(StorageErrorKind),
}

/// Updates collected for the rows of one batch, keyed by row.
#[derive(Debug, Default)]
pub struct RowUpdates {
    rows: BTreeMap<RowKey, Vec<CellUpdate>>,
}

impl RowUpdates {
    pub fn push(&mut self, key: RowKey, update: CellUpdate) {
        self.rows.entry(key).or_default().push(update);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&RowKey, &[CellUpdate])> {
        self.rows.iter().map(|(key, updates)| (key, updates.as_slice()))
    }
}

/// Writes one row's updates if its version is still `expected_version`.
pub async fn write_row(
    store: &dyn GradebookStore,
    key: RowKey,
    expected_version: Version,
    updates: &[CellUpdate],
) -> RowWriteOutcome {
    match store.apply_row_updates(key, expected_version, updates).await {
        Ok(CasResult::Committed { version }) => {
            debug!(
                student_id = %key.student_id,
                is_private = key.is_private,
                cells = updates.len(),
                version,
                "Row committed"
            );
            RowWriteOutcome::Committed { version }
        }
        Ok(CasResult::VersionConflict { actual }) => {
            warn!(
                student_id = %key.student_id,
                is_private = key.is_private,
                expected = expected_version,
                actual,
                "Row changed during recalculation, leaving it dirty"
            );
            if let Err(e) = store.mark_row_dirty(key).await {
                warn!(student_id = %key.student_id, error = %e, "Could not mark row dirty");
            }
            RowWriteOutcome::Conflicted {
                expected: expected_version,
                actual,
            }
        }
        Err(e) => {
            warn!(student_id = %key.student_id, error = %e, "Row write failed");
            RowWriteOutcome::Failed(e)
        }
    }
}
