//! Pipeline error types.

use std::time::Duration;

use thiserror::Error;

use vgn_models::{JobId, ModelError};
use vgn_queue::QueueError;
use vgn_store::StoreError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Undecodable message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid job id in message: {0}")]
    InvalidJobId(String),

    #[error("Unknown output type {0}")]
    UnknownOutputType(String),

    #[error("Invalid checkpoint iteration {0}")]
    InvalidIteration(String),

    #[error("Output {output_type} at iteration {iteration} was not requested")]
    NotRequested { output_type: String, iteration: u32 },

    #[error("Invalid artifact URL {0}")]
    InvalidArtifactUrl(String),

    #[error("Job {0} has no structure-from-motion output")]
    MissingSfm(JobId),

    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn download_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// True if redelivering the same message can never succeed.
    ///
    /// Such messages are dead-lettered instead of requeued.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::Decode(_)
            | PipelineError::InvalidJobId(_)
            | PipelineError::UnknownOutputType(_)
            | PipelineError::InvalidIteration(_)
            | PipelineError::NotRequested { .. }
            | PipelineError::InvalidArtifactUrl(_)
            | PipelineError::MissingSfm(_) => true,
            PipelineError::Store(StoreError::NotFound(_)) => true,
            _ => false,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }

    /// True when a queue append hit an entry left by an earlier delivery.
    pub fn is_already_in_queue(&self) -> bool {
        matches!(self, PipelineError::Store(e) if e.is_already_in_queue())
    }
}
