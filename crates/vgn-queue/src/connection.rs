//! Connection bootstrap.
//!
//! `connect` retries inside a bounded window and redeclares the topology on
//! every successful open. `ensure_connection` reconnects only when the
//! current connection no longer answers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerConfig, BrokerQueue, Consumer};
use crate::error::{QueueError, QueueResult};

/// Shared handle on the broker connection.
pub struct BrokerConnection {
    broker: Arc<dyn Broker>,
    config: BrokerConfig,
    /// Serializes reconnects between publishers and consumer loops
    lock: Mutex<()>,
}

impl BrokerConnection {
    pub fn new(broker: Arc<dyn Broker>, config: BrokerConfig) -> Self {
        Self {
            broker,
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Open the connection, retrying until `connect_window` elapses, then
    /// declare all four queues.
    pub async fn connect(&self) -> QueueResult<()> {
        let _guard = self.lock.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> QueueResult<()> {
        let deadline = Instant::now() + self.config.connect_window;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.broker.open().await {
                Ok(()) => break,
                Err(e) => {
                    if Instant::now() + self.config.connect_retry_interval > deadline {
                        warn!(attempt, error = %e, "Giving up connecting to broker");
                        return Err(QueueError::connection_failed(format!(
                            "no connection after {} attempts in {:?}: {}",
                            attempt, self.config.connect_window, e
                        )));
                    }
                    debug!(attempt, error = %e, "Broker connect attempt failed, retrying");
                    tokio::time::sleep(self.config.connect_retry_interval).await;
                }
            }
        }

        for queue in BrokerQueue::ALL {
            self.broker.declare(queue).await?;
        }

        info!(attempt, "Broker connection established");
        Ok(())
    }

    /// Reconnect if the current connection is not live.
    pub async fn ensure_connection(&self) -> QueueResult<()> {
        if self.broker.is_open().await {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        // Another caller may have reconnected while we waited.
        if self.broker.is_open().await {
            return Ok(());
        }
        info!("Broker connection not live, reconnecting");
        self.connect_locked().await
    }

    /// Serialize `message` as JSON and publish it to `queue`.
    pub async fn publish<M: Serialize + Sync>(&self, queue: BrokerQueue, message: &M) -> QueueResult<String> {
        let body = serde_json::to_vec(message)?;
        self.ensure_connection().await?;
        self.broker.publish(queue, body).await
    }

    /// Register a manual-ack consumer on `queue`.
    pub async fn consume(&self, queue: BrokerQueue, consumer_tag: &str) -> QueueResult<Box<dyn Consumer>> {
        self.broker.consume(queue, consumer_tag).await
    }

    pub async fn close(&self) {
        let _guard = self.lock.lock().await;
        self.broker.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryBroker;

    fn connection(broker: &MemoryBroker) -> BrokerConnection {
        BrokerConnection::new(Arc::new(broker.clone()), BrokerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_once_per_interval() {
        let broker = MemoryBroker::new();
        broker.fail_next_opens(3).await;
        let conn = connection(&broker);

        let started = Instant::now();
        conn.connect().await.unwrap();

        assert_eq!(broker.open_attempts().await, 4);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(broker.declared().await, BrokerQueue::ALL.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_window() {
        let broker = MemoryBroker::new();
        broker.fail_next_opens(usize::MAX).await;
        let conn = connection(&broker);

        let started = Instant::now();
        let err = conn.connect().await.unwrap_err();

        assert!(matches!(err, QueueError::ConnectionFailed(_)));
        assert!(started.elapsed() <= Duration::from_secs(15));
        assert_eq!(broker.open_attempts().await, 16);
    }

    #[tokio::test]
    async fn test_ensure_connection_is_noop_when_live() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);
        conn.connect().await.unwrap();
        conn.ensure_connection().await.unwrap();
        assert_eq!(broker.open_attempts().await, 1);

        broker.drop_connection().await;
        conn.ensure_connection().await.unwrap();
        assert_eq!(broker.open_attempts().await, 2);
    }

    #[tokio::test]
    async fn test_publish_reconnects() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);
        conn.publish(BrokerQueue::SfmIn, &serde_json::json!({ "id": "a" }))
            .await
            .unwrap();
        assert_eq!(broker.published(BrokerQueue::SfmIn).await, vec![br#"{"id":"a"}"#.to_vec()]);
    }
}
