//! The storage crate for regrade.
//!
//! Holds the gradebook data model, the async contracts for the persistent store and the message
//! queue, and in-memory implementations of both that tests and the worker binary run against.

pub mod memory;
pub mod model;
pub mod queue;
pub mod store;
pub mod util;

pub use crate::memory::{InMemoryQueue, InMemoryStore};
pub use crate::model::*;
pub use crate::queue::MessageQueue;
pub use crate::store::GradebookStore;

use thiserror::Error;

/// The different error types that storage operations can result in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageErrorKind {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{entity} {id} was not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageErrorKind {
    pub fn not_found(entity: &'static str, id: impl ToString) -> StorageErrorKind {
        StorageErrorKind::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageErrorKind {
    fn from(e: serde_json::Error) -> Self {
        StorageErrorKind::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageErrorKind>;
