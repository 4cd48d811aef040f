//! Job submission.
//!
//! Creates the job record for an already stored video and starts stage 1.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use vgn_models::{
    JobId, JobRecord, NerfTrainingConfig, OutputType, TrainingMode, Video, DEFAULT_SAVE_ITERATIONS,
    MAX_ITERATIONS,
};
use vgn_store::JobRecordStore;

use crate::error::PipelineResult;
use crate::publisher::StagePublisher;

/// A request to process one video. Unset fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: Option<String>,
    /// Video location relative to the data directory
    pub video_path: String,
    pub training_mode: Option<TrainingMode>,
    pub output_types: Option<Vec<OutputType>>,
    pub save_iterations: Option<Vec<u32>>,
    pub total_iterations: Option<u32>,
}

impl JobSubmission {
    pub fn new(video_path: impl Into<String>) -> Self {
        Self {
            video_path: video_path.into(),
            ..Default::default()
        }
    }

    /// Training config with defaults applied, not yet validated.
    pub fn training_config(&self) -> NerfTrainingConfig {
        NerfTrainingConfig {
            training_mode: self.training_mode.unwrap_or_default(),
            output_types: self
                .output_types
                .clone()
                .unwrap_or_else(|| vec![OutputType::Video]),
            save_iterations: self
                .save_iterations
                .clone()
                .unwrap_or_else(|| DEFAULT_SAVE_ITERATIONS.to_vec()),
            total_iterations: self.total_iterations.unwrap_or(MAX_ITERATIONS),
        }
    }
}

pub struct JobSubmitter {
    records: Arc<dyn JobRecordStore>,
    publisher: Arc<StagePublisher>,
}

impl JobSubmitter {
    pub fn new(records: Arc<dyn JobRecordStore>, publisher: Arc<StagePublisher>) -> Self {
        Self { records, publisher }
    }

    /// Validate, create the record, and publish stage 1.
    ///
    /// A publish failure fails the submission; the record stays behind.
    pub async fn submit(&self, submission: JobSubmission) -> PipelineResult<JobId> {
        let config = submission.training_config();
        config.validate()?;

        let record = JobRecord::new(
            JobId::new(),
            submission.name,
            Video::new(submission.video_path),
            config,
        );
        self.records.create(&record).await?;
        self.publisher.publish_sfm(&record).await?;

        info!(job_id = %record.id, name = %record.name, "Submitted job");
        Ok(record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::PipelineError;
    use vgn_models::{ModelError, QueueName};
    use vgn_queue::{BrokerConfig, BrokerConnection, BrokerQueue, MemoryBroker};
    use vgn_store::{MemoryJobRecordStore, MemoryQueueListStore, QueueListStore};

    struct Fixture {
        broker: MemoryBroker,
        records: Arc<MemoryJobRecordStore>,
        queues: Arc<MemoryQueueListStore>,
        submitter: JobSubmitter,
    }

    fn fixture() -> Fixture {
        let broker = MemoryBroker::new();
        let records = Arc::new(MemoryJobRecordStore::new());
        let queues = Arc::new(MemoryQueueListStore::new());
        let connection = Arc::new(BrokerConnection::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
        ));
        let publisher = Arc::new(StagePublisher::new(
            connection,
            queues.clone(),
            PipelineConfig::default(),
        ));
        let submitter = JobSubmitter::new(records.clone(), publisher);
        Fixture {
            broker,
            records,
            queues,
            submitter,
        }
    }

    #[tokio::test]
    async fn test_submit_applies_defaults() {
        let f = fixture();
        let id = f
            .submitter
            .submit(JobSubmission::new("raw/videos/desk.mp4"))
            .await
            .unwrap();

        let record = f.records.require(&id).await.unwrap();
        assert_eq!(record.name, "Untitled Scene");
        assert_eq!(record.config.nerf, NerfTrainingConfig::default());
        assert_eq!(f.queues.position(QueueName::Overall, &id).await.unwrap(), (0, 1));
        assert_eq!(f.broker.published(BrokerQueue::SfmIn).await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_publishes_nothing() {
        let f = fixture();
        let submission = JobSubmission {
            training_mode: Some(TrainingMode::Tensorf),
            output_types: Some(vec![OutputType::SplatCloud]),
            ..JobSubmission::new("raw/videos/desk.mp4")
        };

        let err = f.submitter.submit(submission).await.unwrap_err();

        assert!(matches!(err, PipelineError::Model(ModelError::InvalidConfig(_))));
        assert!(f.broker.published(BrokerQueue::SfmIn).await.is_empty());
        assert_eq!(f.queues.size(QueueName::Overall).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_fails_submission() {
        let f = fixture();
        f.broker.fail_next_opens(usize::MAX).await;

        let err = f
            .submitter
            .submit(JobSubmission::new("raw/videos/desk.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Queue(_)));
        assert_eq!(f.queues.size(QueueName::Sfm).await.unwrap(), 0);
    }
}
