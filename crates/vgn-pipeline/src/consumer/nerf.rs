//! Training result consumer.

use std::sync::Arc;

use async_trait::async_trait;

use vgn_models::{OutputType, QueueName};
use vgn_queue::{BrokerQueue, Delivery, NerfResultMessage};
use vgn_store::{JobRecordStore, QueueListStore};

use super::{parse_job_id, remove_best_effort, StageHandler};
use crate::artifacts::ArtifactStore;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;

/// Consumes `nerf-out`: checks outputs against the job's request, saves
/// them, and finishes the job.
pub struct NerfResultHandler {
    records: Arc<dyn JobRecordStore>,
    queues: Arc<dyn QueueListStore>,
    artifacts: Arc<ArtifactStore>,
}

impl NerfResultHandler {
    pub fn new(
        records: Arc<dyn JobRecordStore>,
        queues: Arc<dyn QueueListStore>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            records,
            queues,
            artifacts,
        }
    }
}

/// Check every reported output against the requested types and
/// checkpoints. Nothing is downloaded unless all of them pass.
fn requested_outputs<'a>(
    message: &'a NerfResultMessage,
    allowed: impl Fn(OutputType, u32) -> bool,
) -> PipelineResult<Vec<(OutputType, u32, &'a str)>> {
    let mut outputs = Vec::new();
    for (type_name, checkpoints) in &message.file_paths {
        let output_type: OutputType = type_name
            .parse()
            .map_err(|_| PipelineError::UnknownOutputType(type_name.clone()))?;

        for (iteration, url) in checkpoints {
            let iteration: u32 = iteration
                .parse()
                .map_err(|_| PipelineError::InvalidIteration(iteration.clone()))?;
            if !allowed(output_type, iteration) {
                return Err(PipelineError::NotRequested {
                    output_type: output_type.to_string(),
                    iteration,
                });
            }
            outputs.push((output_type, iteration, url.as_str()));
        }
    }
    Ok(outputs)
}

#[async_trait]
impl StageHandler for NerfResultHandler {
    fn queue(&self) -> BrokerQueue {
        BrokerQueue::NerfOut
    }

    fn stage(&self) -> &'static str {
        "nerf"
    }

    async fn handle(&self, delivery: &Delivery) -> PipelineResult<()> {
        let message: NerfResultMessage = serde_json::from_slice(&delivery.body)?;
        let logger = JobLogger::new(&message.id, self.stage());
        let id = parse_job_id(&message.id)?;

        let record = self.records.require(&id).await?;
        let config = &record.config.nerf;
        let outputs = match requested_outputs(&message, |t, i| config.allows(t, i)) {
            Ok(outputs) => outputs,
            Err(e) => {
                logger.log_error(&format!("rejected training result: {}", e));
                return Err(e);
            }
        };
        logger.log_start(&format!("training result with {} outputs", outputs.len()));

        let mut render_outputs = record.nerf.clone().unwrap_or_default();
        for (output_type, iteration, url) in &outputs {
            let path = self
                .artifacts
                .materialize_render_output(&id, *output_type, *iteration, url)
                .await?;
            render_outputs.insert(*output_type, *iteration, path);
        }

        if !outputs.is_empty() {
            self.records.set_render_outputs(&id, &render_outputs).await?;
        }

        remove_best_effort(self.queues.as_ref(), QueueName::Nerf, &id, &logger).await;
        remove_best_effort(self.queues.as_ref(), QueueName::Overall, &id, &logger).await;

        logger.log_completion(&format!("{} render outputs saved", render_outputs.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use vgn_models::NerfTrainingConfig;

    fn message(entries: &[(&str, &str)]) -> NerfResultMessage {
        let mut file_paths: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (output_type, iteration) in entries {
            file_paths
                .entry(output_type.to_string())
                .or_default()
                .insert(iteration.to_string(), format!("http://w/{}", output_type));
        }
        NerfResultMessage {
            id: "65f1c0de0000000000000001".to_string(),
            file_paths,
        }
    }

    #[test]
    fn test_requested_outputs_pass() {
        let config = NerfTrainingConfig::default();
        let msg = message(&[("video", "1000"), ("video", "30000")]);
        let outputs = requested_outputs(&msg, |t, i| config.allows(t, i)).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].0, OutputType::Video);
    }

    #[test]
    fn test_unrequested_type_is_rejected() {
        let config = NerfTrainingConfig::default();
        let msg = message(&[("video", "1000"), ("point_cloud", "1000")]);
        let err = requested_outputs(&msg, |t, i| config.allows(t, i)).unwrap_err();
        assert!(matches!(err, PipelineError::NotRequested { iteration: 1000, .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_unrequested_iteration_is_rejected() {
        let config = NerfTrainingConfig::default();
        let msg = message(&[("video", "2000")]);
        assert!(matches!(
            requested_outputs(&msg, |t, i| config.allows(t, i)),
            Err(PipelineError::NotRequested { iteration: 2000, .. })
        ));
    }

    #[test]
    fn test_garbage_keys_are_rejected() {
        let config = NerfTrainingConfig::default();
        assert!(matches!(
            requested_outputs(&message(&[("hologram", "1000")]), |t, i| config.allows(t, i)),
            Err(PipelineError::UnknownOutputType(_))
        ));
        assert!(matches!(
            requested_outputs(&message(&[("video", "-1")]), |t, i| config.allows(t, i)),
            Err(PipelineError::InvalidIteration(_))
        ));
    }
}
