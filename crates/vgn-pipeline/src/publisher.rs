//! Stage publishers.
//!
//! Publishing sends the stage input to the broker first and records queue
//! membership second. A failed append after a successful publish is
//! returned to the caller; the job then runs without being visible to
//! progress queries.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use vgn_models::{JobRecord, QueueName};
use vgn_queue::{BrokerConnection, BrokerQueue, NerfJobMessage, SfmJobMessage};
use vgn_store::QueueListStore;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

pub struct StagePublisher {
    connection: Arc<BrokerConnection>,
    queues: Arc<dyn QueueListStore>,
    config: PipelineConfig,
}

impl StagePublisher {
    pub fn new(
        connection: Arc<BrokerConnection>,
        queues: Arc<dyn QueueListStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            connection,
            queues,
            config,
        }
    }

    /// Start stage 1 for a freshly created job.
    ///
    /// The stage queue is appended before the overall queue, so a job never
    /// shows a stage position while reported as not processing.
    pub async fn publish_sfm(&self, record: &JobRecord) -> PipelineResult<()> {
        let message = SfmJobMessage {
            id: record.id.clone(),
            file_path: self.config.public_url(Path::new(&record.video.file_path)),
        };

        let message_id = self.connection.publish(BrokerQueue::SfmIn, &message).await?;
        metrics::record_publish("sfm");
        info!(job_id = %record.id, message_id = %message_id, "Published structure-from-motion job");

        self.queues.append(QueueName::Sfm, &record.id).await?;
        self.queues.append(QueueName::Overall, &record.id).await?;
        Ok(())
    }

    /// Start stage 2 from a record that already carries stage-1 output.
    pub async fn publish_nerf(&self, record: &JobRecord) -> PipelineResult<()> {
        let sfm = record
            .sfm
            .as_ref()
            .ok_or_else(|| PipelineError::MissingSfm(record.id.clone()))?;

        let message = NerfJobMessage::new(
            record.id.clone(),
            record.video.width.unwrap_or_default(),
            record.video.height.unwrap_or_default(),
            sfm,
            &record.config.nerf,
        );

        let message_id = self.connection.publish(BrokerQueue::NerfIn, &message).await?;
        metrics::record_publish("nerf");
        info!(
            job_id = %record.id,
            message_id = %message_id,
            frames = sfm.frames.len(),
            "Published training job"
        );

        self.queues.append(QueueName::Nerf, &record.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgn_models::{JobId, NerfTrainingConfig, Sfm, Video};
    use vgn_queue::{BrokerConfig, MemoryBroker};
    use vgn_store::{MemoryQueueListStore, StoreError};

    fn setup() -> (MemoryBroker, Arc<MemoryQueueListStore>, StagePublisher) {
        let broker = MemoryBroker::new();
        let queues = Arc::new(MemoryQueueListStore::new());
        let connection = Arc::new(BrokerConnection::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
        ));
        let publisher = StagePublisher::new(connection, queues.clone(), PipelineConfig::default());
        (broker, queues, publisher)
    }

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::new(),
            None,
            Video::new("raw/videos/desk.mp4"),
            NerfTrainingConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_publish_sfm_appends_stage_then_overall() {
        let (broker, queues, publisher) = setup();
        let record = record();

        publisher.publish_sfm(&record).await.unwrap();

        let published = broker.published(BrokerQueue::SfmIn).await;
        assert_eq!(published.len(), 1);
        let message: SfmJobMessage = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(message.id, record.id);
        assert_eq!(
            message.file_path,
            "http://host.docker.internal:5000/worker-data/raw/videos/desk.mp4"
        );

        assert_eq!(queues.list(QueueName::Sfm).await.unwrap().queue, vec![record.id.clone()]);
        assert_eq!(queues.list(QueueName::Overall).await.unwrap().queue, vec![record.id.clone()]);
    }

    #[tokio::test]
    async fn test_append_failure_after_publish_is_reported() {
        let (broker, queues, publisher) = setup();
        let record = record();
        queues.append(QueueName::Sfm, &record.id).await.unwrap();

        let err = publisher.publish_sfm(&record).await.unwrap_err();

        assert!(matches!(err, PipelineError::Store(StoreError::AlreadyInQueue { .. })));
        assert_eq!(broker.published(BrokerQueue::SfmIn).await.len(), 1);
        assert_eq!(queues.size(QueueName::Overall).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_nerf_requires_sfm() {
        let (broker, queues, publisher) = setup();
        let mut record = record();

        assert!(matches!(
            publisher.publish_nerf(&record).await,
            Err(PipelineError::MissingSfm(_))
        ));

        record.video.width = Some(800);
        record.video.height = Some(600);
        record.sfm = Some(Sfm {
            intrinsic_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            frames: Vec::new(),
            white_background: false,
        });
        publisher.publish_nerf(&record).await.unwrap();

        let published = broker.published(BrokerQueue::NerfIn).await;
        let message: NerfJobMessage = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(message.vid_width, 800);
        assert_eq!(queues.list(QueueName::Nerf).await.unwrap().queue, vec![record.id.clone()]);
        assert_eq!(queues.size(QueueName::Overall).await.unwrap(), 0);
    }
}
