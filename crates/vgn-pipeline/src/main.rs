//! Pipeline orchestrator binary.

use std::sync::Arc;

use tracing::{error, info, warn};

use vgn_pipeline::{init_tracing, metrics, Orchestrator, PipelineConfig};
use vgn_queue::{BrokerConfig, BrokerConnection, RedisBroker};
use vgn_store::{RedisJobRecordStore, RedisQueueListStore, RedisStore};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vgn-orchestrator");

    let config = PipelineConfig::from_env();
    let broker_config = BrokerConfig::from_env();
    info!("Pipeline config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        match metrics::init_metrics(addr) {
            Ok(()) => info!(%addr, "Serving Prometheus metrics"),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    let store = match RedisStore::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create store client: {}", e);
            std::process::exit(1);
        }
    };

    let broker = match RedisBroker::new(broker_config.clone()) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create broker client: {}", e);
            std::process::exit(1);
        }
    };

    let connection = Arc::new(BrokerConnection::new(Arc::new(broker), broker_config));
    let orchestrator = match Orchestrator::new(
        connection,
        Arc::new(RedisQueueListStore::new(store.clone())),
        Arc::new(RedisJobRecordStore::new(store)),
        config,
    ) {
        Ok(o) => o,
        Err(e) => {
            error!("Failed to build orchestrator: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = orchestrator.start().await {
        error!("Failed to connect to broker: {}", e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    orchestrator.shutdown().await;
    info!("Orchestrator shutdown complete");
}
