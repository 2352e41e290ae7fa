use super::{group_by_class, DependencySource, ExprDependencyInstance, SlugUniverse, ValueKey};
use crate::{ExpressionContext, Value};
use async_trait::async_trait;
use regrade_storage::{ClassId, ColumnCell, DependencyKind, GradebookStore, PageRequest, StorageResult};
use std::collections::{BTreeMap, HashMap};

/// Serves `gradebook_columns("slug")`: the whole cell, since aggregates need its max score and
/// flags as well as its score.
///
/// Reading a cell that is missing, has no score or scores zero records the column as missing,
/// together with whatever the cell itself recorded as missing when it was computed. This is how
/// incompleteness travels down a chain of columns.
pub struct GradebookColumnsSource {
    page_size: usize,
    universe: SlugUniverse,
    values: HashMap<ValueKey, ColumnCell>,
}

impl GradebookColumnsSource {
    pub fn new(page_size: usize) -> Self {
        GradebookColumnsSource {
            page_size,
            universe: SlugUniverse::default(),
            values: HashMap::new(),
        }
    }
}

#[async_trait]
impl DependencySource for GradebookColumnsSource {
    fn kind(&self) -> DependencyKind {
        DependencyKind::GradebookColumns
    }

    fn universe(&self) -> &SlugUniverse {
        &self.universe
    }

    async fn load_universe(
        &mut self,
        class_id: ClassId,
        store: &dyn GradebookStore,
    ) -> StorageResult<()> {
        if self.universe.contains_class(class_id) {
            return Ok(());
        }

        let mut entries = BTreeMap::new();
        let mut page = Some(PageRequest::first(self.page_size));
        while let Some(request) = page {
            let result = store.class_columns(class_id, request).await?;
            for column in result.items {
                entries.insert(column.slug, column.id);
            }
            page = result.next;
        }

        tracing::debug!(class_id, columns = entries.len(), "loaded column universe");
        self.universe.insert_class(class_id, entries);

        Ok(())
    }

    async fn retrieve_values(
        &mut self,
        keys: &[ExprDependencyInstance],
        store: &dyn GradebookStore,
    ) -> StorageResult<()> {
        for (class_id, (slugs, students)) in group_by_class(keys) {
            self.load_universe(class_id, store).await?;

            if slugs.is_empty() || students.is_empty() {
                continue;
            }

            let mut page = Some(PageRequest::first(self.page_size));
            while let Some(request) = page {
                let result = store
                    .column_cells(class_id, &slugs, &students, request)
                    .await?;
                for cell in result.items {
                    let key = ValueKey {
                        student_id: cell.student_id,
                        key: cell.column_slug.clone(),
                        class_id: cell.class_id,
                        is_private: cell.is_private,
                    };
                    self.values.entry(key).or_insert(cell);
                }
                page = result.next;
            }
        }

        Ok(())
    }

    fn execute_one(&self, context: &mut ExpressionContext, key: &str) -> Value {
        let kind = self.kind();
        let cell = self.values.get(&ValueKey::for_context(context, key));
        let is_private = context.is_private_calculation;
        let incomplete = &mut context.incomplete_values;

        let cell = match cell {
            Some(cell) => cell,
            None => {
                incomplete.missing.record(kind, key);
                return Value::Undefined;
            }
        };

        let score = cell.effective_score();
        if cell.is_missing || score.is_none() || score == Some(0.0) {
            incomplete.missing.record(kind, key);
        }
        if let Some(upstream) = &cell.incomplete_values {
            incomplete.missing.union(&upstream.missing);
            incomplete.not_released.union(&upstream.not_released);
        }
        if !is_private && !cell.released {
            incomplete.not_released.record(kind, key);
        }

        Value::Cell(Box::new(cell.clone()))
    }
}
