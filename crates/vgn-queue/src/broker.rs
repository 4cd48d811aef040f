//! Broker abstraction and topology.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// Content type stamped on every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// The four fixed broker queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerQueue {
    /// Structure-from-motion worker input
    SfmIn,
    /// Neural-field training worker input
    NerfIn,
    /// Structure-from-motion worker results
    SfmOut,
    /// Neural-field training worker results
    NerfOut,
}

impl BrokerQueue {
    pub const ALL: [BrokerQueue; 4] = [
        BrokerQueue::SfmIn,
        BrokerQueue::NerfIn,
        BrokerQueue::SfmOut,
        BrokerQueue::NerfOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerQueue::SfmIn => "sfm-in",
            BrokerQueue::NerfIn => "nerf-in",
            BrokerQueue::SfmOut => "sfm-out",
            BrokerQueue::NerfOut => "nerf-out",
        }
    }

    /// True for queues the orchestrator consumes.
    pub fn is_output(&self) -> bool {
        matches!(self, BrokerQueue::SfmOut | BrokerQueue::NerfOut)
    }

    /// Consumer group that reads this queue.
    pub fn group<'a>(&self, config: &'a BrokerConfig) -> &'a str {
        if self.is_output() {
            &config.consumer_group
        } else {
            &config.worker_group
        }
    }
}

impl fmt::Display for BrokerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message handed to a consumer, pending until acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: BrokerQueue,
    /// Broker-assigned message ID
    pub id: String,
    pub body: Vec<u8>,
    /// Delivery count, starting at 1
    pub attempt: u32,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis URL
    pub redis_url: String,
    /// How long `connect` keeps retrying before giving up
    pub connect_window: Duration,
    /// Pause between connect attempts
    pub connect_retry_interval: Duration,
    /// Upper bound on processing one delivery
    pub message_timeout: Duration,
    /// Consumer group for the result queues
    pub consumer_group: String,
    /// Consumer group for the worker input queues
    pub worker_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// How long a read blocks waiting for new messages
    pub block_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            connect_window: Duration::from_secs(15),
            connect_retry_interval: Duration::from_secs(1),
            message_timeout: Duration::from_secs(3600),
            consumer_group: "vgn-orchestrator".to_string(),
            worker_group: "vgn-workers".to_string(),
            dlq_stream_name: "vgn:dead-letter".to_string(),
            block_ms: 1000,
        }
    }
}

impl BrokerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            connect_window: Duration::from_secs(
                std::env::var("BROKER_CONNECT_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
            connect_retry_interval: Duration::from_secs(
                std::env::var("BROKER_CONNECT_RETRY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            ),
            message_timeout: Duration::from_secs(
                std::env::var("BROKER_MESSAGE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            consumer_group: std::env::var("BROKER_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            worker_group: std::env::var("BROKER_WORKER_GROUP").unwrap_or(defaults.worker_group),
            dlq_stream_name: std::env::var("BROKER_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            block_ms: std::env::var("BROKER_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        }
    }
}

/// Connection to a message broker.
///
/// Implementations hold at most one live connection; `open` replaces it.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make a single attempt to open the connection and its channel.
    async fn open(&self) -> QueueResult<()>;

    /// True if the current connection answers.
    async fn is_open(&self) -> bool;

    /// Declare `queue` idempotently.
    async fn declare(&self, queue: BrokerQueue) -> QueueResult<()>;

    /// Publish a JSON body to `queue`, returning the message ID.
    async fn publish(&self, queue: BrokerQueue, body: Vec<u8>) -> QueueResult<String>;

    /// Register a manual-ack consumer on a dedicated channel.
    async fn consume(
        &self,
        queue: BrokerQueue,
        consumer_tag: &str,
    ) -> QueueResult<Box<dyn Consumer>>;

    /// Drop the connection.
    async fn close(&self);
}

/// A manual-acknowledgment consumer bound to one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery. An error means the consumer is dead
    /// and must be re-registered.
    async fn recv(&mut self) -> QueueResult<Delivery>;

    async fn ack(&mut self, delivery: &Delivery) -> QueueResult<()>;

    /// Reject a delivery. With `requeue` it is delivered again, otherwise
    /// it goes to the dead letter stream tagged with `reason`.
    async fn nack(&mut self, delivery: &Delivery, requeue: bool, reason: &str) -> QueueResult<()>;
}
