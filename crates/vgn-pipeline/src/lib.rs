//! Orchestrator for the two-stage video reconstruction pipeline.
//!
//! A submitted video goes to the structure-from-motion worker; its result
//! feeds the training worker; the training result finishes the job. This
//! crate publishes the stage inputs, consumes the stage results, keeps the
//! progress queues in step, and restarts consumers when the broker drops.

pub mod artifacts;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod publisher;
pub mod submit;
pub mod supervisor;

pub use artifacts::ArtifactStore;
pub use config::PipelineConfig;
pub use consumer::{NerfResultHandler, SfmResultHandler, StageHandler};
pub use error::{PipelineError, PipelineResult};
pub use logging::{init_tracing, JobLogger};
pub use orchestrator::Orchestrator;
pub use progress::ProgressAggregator;
pub use publisher::StagePublisher;
pub use submit::{JobSubmission, JobSubmitter};
pub use supervisor::ConsumerSupervisor;
