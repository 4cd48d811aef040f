//! Stage consumers.
//!
//! Each handler turns one worker result into durable job state and either
//! advances the job or finishes it. Handlers never ack; the supervisor
//! settles the delivery from the returned result.

mod nerf;
mod sfm;

pub use nerf::NerfResultHandler;
pub use sfm::SfmResultHandler;

use async_trait::async_trait;

use vgn_models::{JobId, QueueName};
use vgn_queue::{BrokerQueue, Delivery};
use vgn_store::QueueListStore;

use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;

/// Processing function for one stage output queue.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Queue this handler consumes.
    fn queue(&self) -> BrokerQueue;

    /// Short stage label for logs and metrics.
    fn stage(&self) -> &'static str;

    async fn handle(&self, delivery: &Delivery) -> PipelineResult<()>;
}

pub(crate) fn parse_job_id(raw: &str) -> PipelineResult<JobId> {
    JobId::parse(raw).map_err(|_| PipelineError::InvalidJobId(raw.to_string()))
}

/// Remove `id` from `queue`, logging instead of failing.
pub(crate) async fn remove_best_effort(
    queues: &dyn QueueListStore,
    queue: QueueName,
    id: &JobId,
    logger: &JobLogger,
) {
    if let Err(e) = queues.remove(queue, id).await {
        logger.log_warning(&format!("could not remove from {}: {}", queue, e));
    }
}

/// Whether `id` is currently listed in `queue`.
pub(crate) async fn in_queue(
    queues: &dyn QueueListStore,
    queue: QueueName,
    id: &JobId,
) -> PipelineResult<bool> {
    match queues.position(queue, id).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_in_queue() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
