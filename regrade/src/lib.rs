//! `regrade` keeps computed gradebook columns up to date.
//!
//! Recalculation requests arrive on a queue, one per (column, student, privacy tier) cell. The
//! [`worker::QueueWorker`] reads a bounded batch, the scheduler in [`dependency::schedule`] orders
//! the touched columns so that every column runs after the columns it reads, and the
//! [`evaluation::CellEvaluator`] computes each ordered batch against a fresh set of dependency
//! sources before [`row_updater`] persists the results with a version check per student row.
//!
//! A quick end to end run against the in-memory store and queue:
//!
//! ```rust
//! use regrade::config::WorkerConfig;
//! use regrade::worker::QueueWorker;
//! use regrade_storage::{InMemoryQueue, InMemoryStore};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let queue = Arc::new(InMemoryQueue::new());
//! let worker = QueueWorker::new(store, queue, WorkerConfig::default());
//!
//! // Nothing is queued, so nothing is read.
//! let report = worker.poll_once().await.unwrap();
//! assert_eq!(report.messages_read, 0);
//! # });
//! ```

pub mod config;
pub mod dependency;
pub mod evaluation;
pub mod observability;
pub mod row_updater;
pub mod trigger;
pub mod worker;

use regrade_computation::CompileErrorKind;
use regrade_storage::{ColumnId, StorageErrorKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageErrorKind),

    #[error("Prefetching dependency values failed: {0}")]
    Prefetch(StorageErrorKind),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileErrorKind),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Column {column_id} would depend on itself through {path:?}")]
    DependencyCycle {
        column_id: ColumnId,
        path: Vec<ColumnId>,
    },

    #[error("{0} was not found")]
    NotFound(String),

    #[error("Background evaluation task failed: {0}")]
    Join(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ErrorKind {
    fn from(e: serde_json::Error) -> Self {
        ErrorKind::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ErrorKind {
    fn from(e: tokio::task::JoinError) -> Self {
        ErrorKind::Join(e.to_string())
    }
}
