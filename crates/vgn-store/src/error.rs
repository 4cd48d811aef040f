//! Store error types.

use thiserror::Error;
use vgn_models::{JobId, QueueName};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {id} is already in queue {queue}")]
    AlreadyInQueue { queue: QueueName, id: JobId },

    #[error("Job {id} not found in queue {queue}")]
    NotInQueue { queue: QueueName, id: JobId },

    #[error("Job {id} found multiple times in queue {queue}")]
    MultipleEntries { queue: QueueName, id: JobId },

    #[error("Invalid operation on empty queue {0}")]
    EmptyQueue(QueueName),

    #[error("Job record not found: {0}")]
    NotFound(JobId),

    #[error("Job record already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Corrupt document {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for "job is not in this queue", the normal answer for finished jobs.
    pub fn is_not_in_queue(&self) -> bool {
        matches!(self, StoreError::NotInQueue { .. })
    }

    pub fn is_already_in_queue(&self) -> bool {
        matches!(self, StoreError::AlreadyInQueue { .. })
    }
}
