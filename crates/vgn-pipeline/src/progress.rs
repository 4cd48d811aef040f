//! Progress aggregator.

use std::sync::Arc;

use vgn_models::{JobId, ProcessingStatus, QueueName};
use vgn_store::QueueListStore;

use crate::error::PipelineResult;

/// Builds a job's processing status from queue membership alone.
pub struct ProgressAggregator {
    queues: Arc<dyn QueueListStore>,
}

impl ProgressAggregator {
    pub fn new(queues: Arc<dyn QueueListStore>) -> Self {
        Self { queues }
    }

    /// Absence from the overall queue means not processing. Otherwise the
    /// first stage queue holding the job, in pipeline order, supplies the
    /// stage fields; between stages only the overall fields are set.
    pub async fn status(&self, id: &JobId) -> PipelineResult<ProcessingStatus> {
        let (position, size) = match self.queues.position(QueueName::Overall, id).await {
            Ok(found) => found,
            Err(e) if e.is_not_in_queue() => return Ok(ProcessingStatus::not_processing()),
            Err(e) => return Err(e.into()),
        };
        let status = ProcessingStatus::overall(position, size);

        for stage in QueueName::STAGES {
            match self.queues.position(stage, id).await {
                Ok((stage_position, stage_size)) => {
                    return Ok(status.with_stage(stage, stage_position, stage_size));
                }
                Err(e) if e.is_not_in_queue() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgn_store::MemoryQueueListStore;

    fn id(n: u8) -> JobId {
        JobId::parse(&format!("{:024x}", n)).unwrap()
    }

    async fn setup() -> (Arc<MemoryQueueListStore>, ProgressAggregator) {
        let queues = Arc::new(MemoryQueueListStore::new());
        let progress = ProgressAggregator::new(queues.clone());
        (queues, progress)
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_processing() {
        let (_, progress) = setup().await;
        assert_eq!(progress.status(&id(1)).await.unwrap(), ProcessingStatus::not_processing());
    }

    #[tokio::test]
    async fn test_stage_position() {
        let (queues, progress) = setup().await;
        for n in 1..=3 {
            queues.append(QueueName::Overall, &id(n)).await.unwrap();
        }
        queues.append(QueueName::Sfm, &id(3)).await.unwrap();
        queues.append(QueueName::Nerf, &id(1)).await.unwrap();
        queues.append(QueueName::Nerf, &id(2)).await.unwrap();

        let status = progress.status(&id(2)).await.unwrap();
        assert!(status.processing);
        assert_eq!(status.overall_position, Some(1));
        assert_eq!(status.overall_size, Some(3));
        assert_eq!(status.stage, Some(QueueName::Nerf));
        assert_eq!(status.stage_position, Some(1));
        assert_eq!(status.stage_size, Some(2));
        assert!(status.stage_position < status.stage_size);

        let status = progress.status(&id(3)).await.unwrap();
        assert_eq!(status.stage, Some(QueueName::Sfm));
        assert_eq!(status.stage_position, Some(0));
    }

    #[tokio::test]
    async fn test_between_stages_reports_overall_only() {
        let (queues, progress) = setup().await;
        queues.append(QueueName::Overall, &id(1)).await.unwrap();

        let status = progress.status(&id(1)).await.unwrap();
        assert_eq!(status, ProcessingStatus::overall(0, 1));
        assert!(status.stage.is_none());
    }

    #[tokio::test]
    async fn test_stage_entry_without_overall_is_not_processing() {
        let (queues, progress) = setup().await;
        queues.append(QueueName::Sfm, &id(1)).await.unwrap();
        assert!(!progress.status(&id(1)).await.unwrap().processing);
    }
}
