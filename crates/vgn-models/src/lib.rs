//! Shared data models for the VidGoNerf pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers
//! - Job records (video, structure-from-motion output, training config, render outputs)
//! - The fixed set of progress queues
//! - Processing status reports

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod scene;

pub use error::{ModelError, ModelResult};
pub use job::JobId;
pub use progress::ProcessingStatus;
pub use queue::QueueName;
pub use scene::{
    ExtrinsicMatrix, Frame, IntrinsicMatrix, JobRecord, NerfTrainingConfig, OutputType,
    RenderOutputs, Sfm, SfmTrainingConfig, TrainingConfig, TrainingMode, Video,
    DEFAULT_SAVE_ITERATIONS, DEFAULT_SCENE_NAME, MAX_ITERATIONS,
};
