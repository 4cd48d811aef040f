//! Pipeline metrics.
//!
//! - Deliveries by stage and outcome
//! - Consumer loop restarts
//! - Stage publishes
//! - Artifact download volume and latency

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric name constants for consistency.
pub mod names {
    /// Deliveries handled, by stage and outcome.
    pub const DELIVERIES_TOTAL: &str = "vgn_deliveries_total";

    /// Delivery handling time in seconds, by stage.
    pub const DELIVERY_DURATION_SECONDS: &str = "vgn_delivery_duration_seconds";

    /// Consumer loop restarts, by stage.
    pub const CONSUMER_RESTARTS_TOTAL: &str = "vgn_consumer_restarts_total";

    /// Messages published, by stage.
    pub const PUBLISHES_TOTAL: &str = "vgn_publishes_total";

    /// Bytes written by artifact downloads.
    pub const DOWNLOAD_BYTES_TOTAL: &str = "vgn_download_bytes_total";

    /// Artifact download latency in seconds.
    pub const DOWNLOAD_DURATION_SECONDS: &str = "vgn_download_duration_seconds";
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack,
    Requeue,
    DeadLetter,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Ack => "ack",
            DeliveryOutcome::Requeue => "requeue",
            DeliveryOutcome::DeadLetter => "dead_letter",
        }
    }
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_delivery(stage: &str, outcome: DeliveryOutcome, duration_secs: f64) {
    counter!(
        names::DELIVERIES_TOTAL,
        "stage" => stage.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(names::DELIVERY_DURATION_SECONDS, "stage" => stage.to_string()).record(duration_secs);
}

pub fn record_consumer_restart(stage: &str) {
    counter!(names::CONSUMER_RESTARTS_TOTAL, "stage" => stage.to_string()).increment(1);
}

pub fn record_publish(stage: &str) {
    counter!(names::PUBLISHES_TOTAL, "stage" => stage.to_string()).increment(1);
}

pub fn record_download(bytes: u64, duration_secs: f64) {
    counter!(names::DOWNLOAD_BYTES_TOTAL).increment(bytes);
    histogram!(names::DOWNLOAD_DURATION_SECONDS).record(duration_secs);
}
