//! Broker on Redis Streams.
//!
//! Each broker queue is a stream read through a consumer group. Requeue
//! re-appends the entry with a bumped attempt counter; dead letters go to a
//! separate stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerConfig, BrokerQueue, Consumer, Delivery, CONTENT_TYPE_JSON};
use crate::error::{QueueError, QueueResult};

const FIELD_BODY: &str = "body";
const FIELD_CONTENT_TYPE: &str = "content_type";
const FIELD_ATTEMPT: &str = "attempt";

const READ_COUNT: usize = 16;
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker client for Redis Streams.
pub struct RedisBroker {
    client: redis::Client,
    config: BrokerConfig,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisBroker {
    /// Create a broker client. No connection is made until `open`.
    pub fn new(config: BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            conn: RwLock::new(None),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(BrokerConfig::from_env())
    }

    async fn current(&self) -> QueueResult<MultiplexedConnection> {
        self.conn.read().await.clone().ok_or(QueueError::NotConnected)
    }

    /// Length of the dead letter stream.
    pub async fn dead_letter_len(&self) -> QueueResult<u64> {
        let mut conn = self.current().await?;
        let len: u64 = redis::cmd("XLEN")
            .arg(&self.config.dlq_stream_name)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn open(&self) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        *self.conn.write().await = Some(conn);
        info!(url = %self.config.redis_url, "Connected to broker");
        Ok(())
    }

    async fn is_open(&self) -> bool {
        let Some(mut conn) = self.conn.read().await.clone() else {
            return false;
        };
        matches!(
            tokio::time::timeout(PING_TIMEOUT, redis::cmd("PING").query_async::<()>(&mut conn)).await,
            Ok(Ok(()))
        )
    }

    async fn declare(&self, queue: BrokerQueue) -> QueueResult<()> {
        let mut conn = self.current().await?;
        let group = queue.group(&self.config);

        // Group starts at 0 so entries added before the group existed are read.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue.as_str())
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(queue = %queue, group, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(queue = %queue, group, "Consumer group already exists");
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    async fn publish(&self, queue: BrokerQueue, body: Vec<u8>) -> QueueResult<String> {
        let mut conn = self.current().await?;
        let message_id: String = redis::cmd("XADD")
            .arg(queue.as_str())
            .arg("*")
            .arg(FIELD_BODY)
            .arg(body)
            .arg(FIELD_CONTENT_TYPE)
            .arg(CONTENT_TYPE_JSON)
            .arg(FIELD_ATTEMPT)
            .arg(1u32)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;

        debug!(queue = %queue, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    async fn consume(
        &self,
        queue: BrokerQueue,
        consumer_tag: &str,
    ) -> QueueResult<Box<dyn Consumer>> {
        if self.conn.read().await.is_none() {
            return Err(QueueError::NotConnected);
        }

        // Blocking reads get their own connection.
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_lost(e.to_string()))?;

        Ok(Box::new(RedisConsumer {
            conn,
            queue,
            group: queue.group(&self.config).to_string(),
            consumer: consumer_tag.to_string(),
            dlq_stream: self.config.dlq_stream_name.clone(),
            block_ms: self.config.block_ms,
            draining: true,
            buffer: VecDeque::new(),
        }))
    }

    async fn close(&self) {
        if self.conn.write().await.take().is_some() {
            info!("Closed broker connection");
        }
    }
}

/// Consumer-group reader for one stream.
pub struct RedisConsumer {
    conn: MultiplexedConnection,
    queue: BrokerQueue,
    group: String,
    consumer: String,
    dlq_stream: String,
    block_ms: u64,
    /// Still re-reading this consumer's pending entries
    draining: bool,
    buffer: VecDeque<Delivery>,
}

impl RedisConsumer {
    async fn read_batch(&mut self) -> QueueResult<Vec<StreamId>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT);
        if !self.draining {
            cmd.arg("BLOCK").arg(self.block_ms);
        }
        cmd.arg("STREAMS")
            .arg(self.queue.as_str())
            .arg(if self.draining { "0" } else { ">" });

        let reply: Option<StreamReadReply> = cmd.query_async(&mut self.conn).await?;
        Ok(reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default())
    }

    async fn ack_id(&mut self, id: &str) -> QueueResult<()> {
        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(self.queue.as_str())
            .arg(&self.group)
            .arg(id)
            .ignore()
            .cmd("XDEL")
            .arg(self.queue.as_str())
            .arg(id)
            .ignore()
            .query_async::<()>(&mut self.conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn recv(&mut self) -> QueueResult<Delivery> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(delivery);
            }

            let entries = self.read_batch().await?;
            if self.draining && entries.is_empty() {
                debug!(queue = %self.queue, "Pending entries drained");
                self.draining = false;
                continue;
            }

            for entry in entries {
                match entry.get::<Vec<u8>>(FIELD_BODY) {
                    Some(body) => self.buffer.push_back(Delivery {
                        queue: self.queue,
                        attempt: entry.get::<u32>(FIELD_ATTEMPT).unwrap_or(1),
                        id: entry.id,
                        body,
                    }),
                    None => {
                        // Pending entries already deleted from the stream come back empty.
                        warn!(queue = %self.queue, message_id = %entry.id, "Discarding entry without body");
                        self.ack_id(&entry.id).await?;
                    }
                }
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_id(&delivery.id).await?;
        debug!(queue = %self.queue, message_id = %delivery.id, "Acknowledged message");
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery, requeue: bool, reason: &str) -> QueueResult<()> {
        let queue = self.queue.as_str();
        let mut pipe = redis::pipe();
        pipe.atomic();

        if requeue {
            pipe.cmd("XADD")
                .arg(queue)
                .arg("*")
                .arg(FIELD_BODY)
                .arg(&delivery.body)
                .arg(FIELD_CONTENT_TYPE)
                .arg(CONTENT_TYPE_JSON)
                .arg(FIELD_ATTEMPT)
                .arg(delivery.attempt.saturating_add(1))
                .ignore();
        } else {
            pipe.cmd("XADD")
                .arg(&self.dlq_stream)
                .arg("*")
                .arg(FIELD_BODY)
                .arg(&delivery.body)
                .arg("source_queue")
                .arg(queue)
                .arg("original_id")
                .arg(&delivery.id)
                .arg("error")
                .arg(reason)
                .arg(FIELD_ATTEMPT)
                .arg(delivery.attempt)
                .ignore();
        }

        pipe.cmd("XACK")
            .arg(queue)
            .arg(&self.group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(queue)
            .arg(&delivery.id)
            .ignore();
        pipe.query_async::<()>(&mut self.conn).await?;

        if requeue {
            debug!(queue, message_id = %delivery.id, attempt = delivery.attempt, "Requeued message");
        } else {
            warn!(queue, message_id = %delivery.id, error = reason, "Moved message to dead letter stream");
        }
        Ok(())
    }
}
