//! Wiring of stores, broker, publishers and consumers.

use std::sync::Arc;

use vgn_queue::BrokerConnection;
use vgn_store::{JobRecordStore, QueueListStore};

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::consumer::{NerfResultHandler, SfmResultHandler, StageHandler};
use crate::error::PipelineResult;
use crate::progress::ProgressAggregator;
use crate::publisher::StagePublisher;
use crate::submit::JobSubmitter;
use crate::supervisor::ConsumerSupervisor;

/// Every pipeline component, built over one broker connection and one
/// pair of stores.
pub struct Orchestrator {
    pub connection: Arc<BrokerConnection>,
    pub publisher: Arc<StagePublisher>,
    pub submitter: JobSubmitter,
    pub progress: ProgressAggregator,
    pub supervisor: ConsumerSupervisor,
}

impl Orchestrator {
    pub fn new(
        connection: Arc<BrokerConnection>,
        queues: Arc<dyn QueueListStore>,
        records: Arc<dyn JobRecordStore>,
        config: PipelineConfig,
    ) -> PipelineResult<Self> {
        let artifacts = Arc::new(ArtifactStore::new(config.clone())?);
        let publisher = Arc::new(StagePublisher::new(
            Arc::clone(&connection),
            Arc::clone(&queues),
            config.clone(),
        ));

        let handlers: Vec<Arc<dyn StageHandler>> = vec![
            Arc::new(SfmResultHandler::new(
                Arc::clone(&records),
                Arc::clone(&queues),
                Arc::clone(&artifacts),
                Arc::clone(&publisher),
            )),
            Arc::new(NerfResultHandler::new(
                Arc::clone(&records),
                Arc::clone(&queues),
                artifacts,
            )),
        ];

        let supervisor = ConsumerSupervisor::new(
            Arc::clone(&connection),
            handlers,
            config.consumer_name.clone(),
            config.consumer_backoff,
            config.shutdown_timeout,
        );

        Ok(Self {
            submitter: JobSubmitter::new(records, Arc::clone(&publisher)),
            progress: ProgressAggregator::new(queues),
            connection,
            publisher,
            supervisor,
        })
    }

    /// Connect within the configured window, then start consuming.
    pub async fn start(&self) -> PipelineResult<()> {
        self.connection.connect().await?;
        self.supervisor.start().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
