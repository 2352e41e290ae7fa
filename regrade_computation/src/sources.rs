//! Dependency sources: the providers behind `assignments(...)` and `gradebook_columns(...)`.
//!
//! A fresh [`DependencySourceMap`] is built for every batch. Before compiling, the batch loads
//! each class's universe (slug to id) so globs can be expanded, then bulk-prefetches every value
//! the batch will read. Evaluation afterwards is synchronous and never touches the store.

mod assignments;
mod gradebook_columns;
mod universe;

pub use self::assignments::AssignmentsSource;
pub use self::gradebook_columns::GradebookColumnsSource;
pub use self::universe::SlugUniverse;

use crate::{ExpressionContext, Value};
use async_trait::async_trait;
use futures::future::try_join_all;
use regrade_storage::{ClassId, DependencyKind, GradebookStore, StorageResult, StudentId};
use std::collections::HashMap;

/// The key argument of a dependency call: one slug, or an array of slugs (the form a glob is
/// compiled into).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    One(String),
    Many(Vec<String>),
}

impl DependencyKey {
    pub fn slugs(&self) -> &[String] {
        match self {
            DependencyKey::One(slug) => std::slice::from_ref(slug),
            DependencyKey::Many(slugs) => slugs,
        }
    }
}

/// One value a batch is going to read, used to drive prefetching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprDependencyInstance {
    pub class_id: ClassId,
    pub key: DependencyKey,
    pub student_id: StudentId,
}

/// Identifies a prefetched value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueKey {
    pub student_id: StudentId,
    pub key: String,
    pub class_id: ClassId,
    pub is_private: bool,
}

impl ValueKey {
    pub fn for_context(context: &ExpressionContext, key: &str) -> ValueKey {
        ValueKey {
            student_id: context.student_id,
            key: key.to_string(),
            class_id: context.class_id,
            is_private: context.is_private_calculation,
        }
    }
}

#[async_trait]
pub trait DependencySource: Send + Sync {
    fn kind(&self) -> DependencyKind;

    fn universe(&self) -> &SlugUniverse;

    /// Pages through the class's slugs and caches them. Loading an already known class is a
    /// no-op.
    async fn load_universe(
        &mut self,
        class_id: ClassId,
        store: &dyn GradebookStore,
    ) -> StorageResult<()>;

    /// Bulk-reads the values for the given instances, both privacy tiers. Additive: values that
    /// are already present are kept as they are.
    async fn retrieve_values(
        &mut self,
        keys: &[ExprDependencyInstance],
        store: &dyn GradebookStore,
    ) -> StorageResult<()>;

    /// The value of one slug for the context's student and tier. Records whatever is missing or
    /// withheld into the context's incomplete values.
    fn execute_one(&self, context: &mut ExpressionContext, key: &str) -> Value;

    fn execute(&self, context: &mut ExpressionContext, key: &DependencyKey) -> Value {
        match key {
            DependencyKey::One(key) => self.execute_one(context, key),
            DependencyKey::Many(keys) => Value::Array(
                keys.iter()
                    .map(|key| self.execute_one(context, key))
                    .collect(),
            ),
        }
    }

    fn expand_key(&self, glob: &str, class_id: ClassId) -> Vec<String> {
        self.universe().expand(glob, class_id)
    }

    fn slugs_for(&self, class_id: ClassId, ids: &[i64]) -> Vec<String> {
        self.universe().slugs_for(class_id, ids)
    }

    fn ids_for(&self, class_id: ClassId, slugs: &[String]) -> Vec<i64> {
        self.universe().ids_for(class_id, slugs)
    }
}

/// The set of dependency sources used by one batch, one per kind.
pub struct DependencySourceMap {
    sources: Vec<Box<dyn DependencySource>>,
}

impl DependencySourceMap {
    pub fn new(sources: Vec<Box<dyn DependencySource>>) -> Self {
        DependencySourceMap { sources }
    }

    /// A map without any source. Formulas evaluated against it cannot read dependencies.
    pub fn empty() -> Self {
        DependencySourceMap { sources: vec![] }
    }

    /// The assignments and gradebook-columns sources, reading in pages of `page_size`.
    pub fn standard(page_size: usize) -> Self {
        DependencySourceMap::new(vec![
            Box::new(AssignmentsSource::new(page_size)),
            Box::new(GradebookColumnsSource::new(page_size)),
        ])
    }

    pub fn get(&self, kind: DependencyKind) -> Option<&dyn DependencySource> {
        self.sources
            .iter()
            .find(|source| source.kind() == kind)
            .map(|source| &**source)
    }

    pub async fn load_universe(
        &mut self,
        class_id: ClassId,
        store: &dyn GradebookStore,
    ) -> StorageResult<()> {
        for source in self.sources.iter_mut() {
            source.load_universe(class_id, store).await?;
        }

        Ok(())
    }

    /// Prefetches every source concurrently. The first failure aborts the whole prefetch.
    pub async fn prefetch(
        &mut self,
        instances: &HashMap<DependencyKind, Vec<ExprDependencyInstance>>,
        store: &dyn GradebookStore,
    ) -> StorageResult<()> {
        try_join_all(self.sources.iter_mut().map(|source| {
            let keys = instances
                .get(&source.kind())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            source.retrieve_values(keys, store)
        }))
        .await?;

        Ok(())
    }

    /// `None` when no source of that kind is registered.
    pub fn execute(
        &self,
        kind: DependencyKind,
        context: &mut ExpressionContext,
        key: &DependencyKey,
    ) -> Option<Value> {
        self.get(kind).map(|source| source.execute(context, key))
    }

    pub fn expand_key(&self, kind: DependencyKind, glob: &str, class_id: ClassId) -> Vec<String> {
        self.get(kind)
            .map(|source| source.expand_key(glob, class_id))
            .unwrap_or_default()
    }

    pub fn slugs_for(&self, kind: DependencyKind, class_id: ClassId, ids: &[i64]) -> Vec<String> {
        self.get(kind)
            .map(|source| source.slugs_for(class_id, ids))
            .unwrap_or_default()
    }

    pub fn ids_for(&self, kind: DependencyKind, class_id: ClassId, slugs: &[String]) -> Vec<i64> {
        self.get(kind)
            .map(|source| source.ids_for(class_id, slugs))
            .unwrap_or_default()
    }
}

/// Groups instances per class into the distinct slugs and students to read.
pub(crate) fn group_by_class(
    keys: &[ExprDependencyInstance],
) -> HashMap<ClassId, (Vec<String>, Vec<StudentId>)> {
    let mut grouped: HashMap<ClassId, (Vec<String>, Vec<StudentId>)> = HashMap::new();

    for instance in keys {
        let (slugs, students) = grouped.entry(instance.class_id).or_default();
        for slug in instance.key.slugs() {
            if !slugs.contains(slug) {
                slugs.push(slug.clone());
            }
        }
        if !students.contains(&instance.student_id) {
            students.push(instance.student_id);
        }
    }

    grouped
}
