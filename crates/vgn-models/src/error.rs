//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("Invalid training mode: {0}")]
    InvalidTrainingMode(String),

    #[error("Invalid output type: {0}")]
    InvalidOutputType(String),

    #[error("Invalid training config: {0}")]
    InvalidConfig(String),

    #[error("No output path found for {output_type} at iteration {iteration:?}")]
    NoOutputPaths {
        output_type: String,
        iteration: Option<u32>,
    },
}

impl ModelError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
