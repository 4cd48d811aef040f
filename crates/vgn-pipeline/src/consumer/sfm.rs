//! Structure-from-motion result consumer.

use std::sync::Arc;

use async_trait::async_trait;

use vgn_models::{JobRecord, QueueName, RenderOutputs};
use vgn_queue::{BrokerQueue, Delivery, SfmResultMessage};
use vgn_store::{JobRecordStore, QueueListStore};

use super::{in_queue, parse_job_id, remove_best_effort, StageHandler};
use crate::artifacts::ArtifactStore;
use crate::error::PipelineResult;
use crate::logging::JobLogger;
use crate::publisher::StagePublisher;

/// Consumes `sfm-out`: saves frames and camera data, then starts training.
pub struct SfmResultHandler {
    records: Arc<dyn JobRecordStore>,
    queues: Arc<dyn QueueListStore>,
    artifacts: Arc<ArtifactStore>,
    publisher: Arc<StagePublisher>,
}

impl SfmResultHandler {
    pub fn new(
        records: Arc<dyn JobRecordStore>,
        queues: Arc<dyn QueueListStore>,
        artifacts: Arc<ArtifactStore>,
        publisher: Arc<StagePublisher>,
    ) -> Self {
        Self {
            records,
            queues,
            artifacts,
            publisher,
        }
    }
}

#[async_trait]
impl StageHandler for SfmResultHandler {
    fn queue(&self) -> BrokerQueue {
        BrokerQueue::SfmOut
    }

    fn stage(&self) -> &'static str {
        "sfm"
    }

    async fn handle(&self, delivery: &Delivery) -> PipelineResult<()> {
        let mut message: SfmResultMessage = serde_json::from_slice(&delivery.body)?;
        let logger = JobLogger::new(&message.id, self.stage());
        let id = parse_job_id(&message.id)?;
        logger.log_start(&format!(
            "structure-from-motion result with {} frames (attempt {})",
            message.sfm.frames.len(),
            delivery.attempt
        ));

        if message.succeeded() {
            let record = self.records.require(&id).await?;
            if record.sfm.is_some() && !in_queue(self.queues.as_ref(), QueueName::Sfm, &id).await? {
                return self.resume_training(&record, &logger).await;
            }

            self.artifacts.materialize_frames(&id, &mut message.sfm).await?;
            logger.log_progress("frames saved locally");
        }

        let record = self
            .records
            .set_sfm(&id, &message.sfm, message.vid_width, message.vid_height)
            .await?;

        // Stage-1 output is durable from here; a retry only republishes stage 2.
        remove_best_effort(self.queues.as_ref(), QueueName::Sfm, &id, &logger).await;

        if !message.succeeded() {
            let outputs = RenderOutputs {
                flag: message.flag,
                ..RenderOutputs::default()
            };
            self.records.set_render_outputs(&id, &outputs).await?;
            remove_best_effort(self.queues.as_ref(), QueueName::Overall, &id, &logger).await;
            logger.log_warning(&format!("worker reported failure flag {}, job stopped", message.flag));
            return Ok(());
        }

        self.start_training(&record, &logger).await
    }
}

impl SfmResultHandler {
    /// Redelivery after stage 1 was saved: frames are not fetched again.
    async fn resume_training(&self, record: &JobRecord, logger: &JobLogger) -> PipelineResult<()> {
        let queues = self.queues.as_ref();
        if in_queue(queues, QueueName::Nerf, &record.id).await? {
            logger.log_warning("already in the training queue from an earlier delivery");
            return Ok(());
        }
        if !in_queue(queues, QueueName::Overall, &record.id).await? {
            logger.log_warning("job already finished, nothing to republish");
            return Ok(());
        }

        logger.log_progress("stage-1 output already saved, republishing training job");
        self.start_training(record, logger).await
    }

    async fn start_training(&self, record: &JobRecord, logger: &JobLogger) -> PipelineResult<()> {
        match self.publisher.publish_nerf(record).await {
            Ok(()) => {}
            Err(e) if e.is_already_in_queue() => {
                logger.log_warning("already in the training queue from an earlier delivery");
            }
            Err(e) => return Err(e),
        }

        logger.log_completion("training job published");
        Ok(())
    }
}
