//! Orders a worklist of cells into batches that respect column dependencies.
//!
//! Only the columns present in the worklist take part. Column D must run before column C when C
//! declares D among its `gradebook_columns`. Each batch holds every column whose prerequisites
//! were all handled by earlier batches (Kahn's algorithm, one layer at a time).

use regrade_storage::{ColumnId, GradebookColumn, RecalcRequest};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::error;

/// One layer of the schedule. Its cells may be evaluated concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Ascending.
    pub column_ids: Vec<ColumnId>,
    /// Grouped by column in `column_ids` order, worklist order within a column.
    pub requests: Vec<RecalcRequest>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    /// Columns that sit on, or behind, a dependency cycle. They all run in the last batch.
    pub cyclic_columns: Vec<ColumnId>,
}

impl BatchPlan {
    pub fn request_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.requests.len()).sum()
    }
}

/// Builds the batch plan for a worklist. Columns missing from `columns` are treated as having
/// no dependencies.
pub fn schedule_batches(
    worklist: &[RecalcRequest],
    columns: &HashMap<ColumnId, GradebookColumn>,
) -> BatchPlan {
    let mut requests_by_column: BTreeMap<ColumnId, Vec<RecalcRequest>> = BTreeMap::new();
    for request in worklist {
        requests_by_column
            .entry(request.column_id)
            .or_default()
            .push(*request);
    }

    let mut in_degree: BTreeMap<ColumnId, usize> =
        requests_by_column.keys().map(|&id| (id, 0)).collect();
    let mut dependents: HashMap<ColumnId, Vec<ColumnId>> = HashMap::new();

    for &column_id in requests_by_column.keys() {
        let reads = columns
            .get(&column_id)
            .map(|column| column.dependencies.gradebook_columns.as_slice())
            .unwrap_or(&[]);

        // A column listed twice is still one edge.
        let reads: BTreeSet<ColumnId> = reads
            .iter()
            .copied()
            .filter(|id| requests_by_column.contains_key(id))
            .collect();

        for dependency in reads {
            dependents.entry(dependency).or_default().push(column_id);
            if let Some(degree) = in_degree.get_mut(&column_id) {
                *degree += 1;
            }
        }
    }

    let mut layers: Vec<Vec<ColumnId>> = vec![];
    let mut ready: Vec<ColumnId> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();

    while !ready.is_empty() {
        let mut next = BTreeSet::new();

        for column_id in &ready {
            in_degree.remove(column_id);
            for dependent in dependents.get(column_id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(*dependent);
                    }
                }
            }
        }

        layers.push(ready);
        ready = next.into_iter().collect();
    }

    // Whatever was never released is on a cycle or downstream of one.
    let cyclic_columns: Vec<ColumnId> = in_degree.keys().copied().collect();
    if !cyclic_columns.is_empty() {
        error!(
            columns = ?cyclic_columns,
            "Dependency cycle detected, evaluating the remaining columns together"
        );
        layers.push(cyclic_columns.clone());
    }

    let batches = layers
        .into_iter()
        .map(|column_ids| {
            let requests = column_ids
                .iter()
                .flat_map(|id| requests_by_column.remove(id).unwrap_or_default())
                .collect();
            Batch {
                column_ids,
                requests,
            }
        })
        .collect();

    BatchPlan {
        batches,
        cyclic_columns,
    }
}
