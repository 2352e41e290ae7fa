use super::{group_by_class, DependencySource, ExprDependencyInstance, SlugUniverse, ValueKey};
use crate::{ExpressionContext, Value};
use async_trait::async_trait;
use regrade_storage::{
    AssignmentScore, ClassId, DependencyKind, GradebookStore, PageRequest, StorageResult,
};
use std::collections::{BTreeMap, HashMap};

/// What one tier is allowed to see of a score.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TierScore {
    score: Option<f64>,
    withheld: bool,
}

/// Serves `assignments("slug")`: the student's total score on an assignment. The student tier
/// only sees scores whose review has been released.
pub struct AssignmentsSource {
    page_size: usize,
    universe: SlugUniverse,
    values: HashMap<ValueKey, TierScore>,
}

impl AssignmentsSource {
    pub fn new(page_size: usize) -> Self {
        AssignmentsSource {
            page_size,
            universe: SlugUniverse::default(),
            values: HashMap::new(),
        }
    }

    fn insert(&mut self, score: &AssignmentScore) {
        for is_private in [true, false].iter().copied() {
            let key = ValueKey {
                student_id: score.student_id,
                key: score.slug.clone(),
                class_id: score.class_id,
                is_private,
            };
            let tier_score = if is_private || score.released {
                TierScore {
                    score: score.score,
                    withheld: false,
                }
            } else {
                TierScore {
                    score: None,
                    withheld: true,
                }
            };

            self.values.entry(key).or_insert(tier_score);
        }
    }
}

#[async_trait]
impl DependencySource for AssignmentsSource {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Assignments
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
            let result = store.class_assignments(class_id, request).await?;
            for assignment in result.items {
                entries.insert(assignment.slug, assignment.id);
            }
            page = result.next;
        }

        tracing::debug!(class_id, assignments = entries.len(), "loaded assignment universe");
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
                    .assignment_scores(class_id, &slugs, &students, request)
                    .await?;
                for score in &result.items {
                    self.insert(score);
                }
                page = result.next;
            }
        }

        Ok(())
    }

    fn execute_one(&self, context: &mut ExpressionContext, key: &str) -> Value {
        let value = self.values.get(&ValueKey::for_context(context, key));
        let incomplete = &mut context.incomplete_values;

        match value {
            Some(TierScore { withheld: true, .. }) => {
                incomplete.not_released.record(self.kind(), key);
                Value::Undefined
            }
            Some(TierScore {
                score: Some(score), ..
            }) => Value::Number(*score),
            _ => {
                incomplete.missing.record(self.kind(), key);
                Value::Undefined
            }
        }
    }
}
