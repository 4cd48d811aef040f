//! In-process broker.
//!
//! Mirrors the Redis broker's delivery semantics and adds hooks for tests:
//! dropping the connection, failing opens, and inspecting what was
//! published or dead-lettered.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::broker::{Broker, BrokerQueue, Consumer, Delivery};
use crate::error::{QueueError, QueueResult};

/// A message rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
}

#[derive(Default)]
struct State {
    open: bool,
    /// Bumped on every open/close; consumers from an older generation are dead.
    generation: u64,
    open_attempts: usize,
    fail_next_opens: usize,
    next_id: u64,
    declared: Vec<BrokerQueue>,
    ready: HashMap<BrokerQueue, VecDeque<Delivery>>,
    unacked: HashMap<String, Delivery>,
    published: HashMap<BrokerQueue, Vec<Vec<u8>>>,
    acked: Vec<Delivery>,
    dead_letters: Vec<DeadLetter>,
}

impl State {
    fn enqueue(&mut self, queue: BrokerQueue, body: Vec<u8>, attempt: u32) -> String {
        self.next_id += 1;
        let id = format!("{}-0", self.next_id);
        self.ready.entry(queue).or_default().push_back(Delivery {
            queue,
            id: id.clone(),
            body,
            attempt,
        });
        id
    }
}

fn sequence(id: &str) -> u64 {
    id.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Broker held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the connection dropping. Live consumers fail and
    /// unacknowledged messages go back to the front of their queue.
    pub async fn drop_connection(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.open = false;
            state.generation += 1;
            let mut unacked: Vec<Delivery> = state.unacked.drain().map(|(_, d)| d).collect();
            unacked.sort_by_key(|d| std::cmp::Reverse(sequence(&d.id)));
            for mut delivery in unacked {
                delivery.attempt += 1;
                state.ready.entry(delivery.queue).or_default().push_front(delivery);
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Make the next `n` calls to `open` fail.
    pub async fn fail_next_opens(&self, n: usize) {
        self.inner.state.lock().await.fail_next_opens = n;
    }

    /// Number of `open` calls made so far, failed ones included.
    pub async fn open_attempts(&self) -> usize {
        self.inner.state.lock().await.open_attempts
    }

    pub async fn declared(&self) -> Vec<BrokerQueue> {
        self.inner.state.lock().await.declared.clone()
    }

    /// Bodies published to `queue` through `publish`, oldest first.
    pub async fn published(&self, queue: BrokerQueue) -> Vec<Vec<u8>> {
        self.inner
            .state
            .lock()
            .await
            .published
            .get(&queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Inject a message as if a worker had produced it.
    pub async fn push(&self, queue: BrokerQueue, body: impl Into<Vec<u8>>) -> String {
        let id = self.inner.state.lock().await.enqueue(queue, body.into(), 1);
        self.inner.notify.notify_waiters();
        id
    }

    pub async fn acked(&self) -> Vec<Delivery> {
        self.inner.state.lock().await.acked.clone()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state.lock().await.dead_letters.clone()
    }

    /// Messages waiting for delivery on `queue`.
    pub async fn ready_len(&self, queue: BrokerQueue) -> usize {
        self.inner
            .state
            .lock()
            .await
            .ready
            .get(&queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open(&self) -> QueueResult<()> {
        let mut state = self.inner.state.lock().await;
        state.open_attempts += 1;
        if state.fail_next_opens > 0 {
            state.fail_next_opens -= 1;
            return Err(QueueError::connection_failed("connection refused"));
        }
        state.open = true;
        state.generation += 1;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.inner.state.lock().await.open
    }

    async fn declare(&self, queue: BrokerQueue) -> QueueResult<()> {
        let mut state = self.inner.state.lock().await;
        if !state.open {
            return Err(QueueError::NotConnected);
        }
        if !state.declared.contains(&queue) {
            state.declared.push(queue);
        }
        Ok(())
    }

    async fn publish(&self, queue: BrokerQueue, body: Vec<u8>) -> QueueResult<String> {
        let id = {
            let mut state = self.inner.state.lock().await;
            if !state.open {
                return Err(QueueError::NotConnected);
            }
            state.published.entry(queue).or_default().push(body.clone());
            state.enqueue(queue, body, 1)
        };
        self.inner.notify.notify_waiters();
        Ok(id)
    }

    async fn consume(
        &self,
        queue: BrokerQueue,
        _consumer_tag: &str,
    ) -> QueueResult<Box<dyn Consumer>> {
        let state = self.inner.state.lock().await;
        if !state.open {
            return Err(QueueError::NotConnected);
        }
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            queue,
            generation: state.generation,
        }))
    }

    async fn close(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.open = false;
            state.generation += 1;
        }
        self.inner.notify.notify_waiters();
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    queue: BrokerQueue,
    generation: u64,
}

impl MemoryConsumer {
    fn check_alive(&self, state: &State) -> QueueResult<()> {
        if !state.open || state.generation != self.generation {
            return Err(QueueError::connection_lost("channel closed"));
        }
        Ok(())
    }

    async fn settle(&self, delivery: &Delivery) -> QueueResult<(MutexGuard<'_, State>, Delivery)> {
        let mut state = self.inner.state.lock().await;
        self.check_alive(&state)?;
        let settled = state.unacked.remove(&delivery.id).ok_or_else(|| {
            QueueError::connection_lost(format!("unknown delivery {}", delivery.id))
        })?;
        Ok((state, settled))
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn recv(&mut self) -> QueueResult<Delivery> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                self.check_alive(&state)?;
                if let Some(delivery) = state.ready.get_mut(&self.queue).and_then(VecDeque::pop_front) {
                    state.unacked.insert(delivery.id.clone(), delivery.clone());
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> QueueResult<()> {
        let (mut state, settled) = self.settle(delivery).await?;
        state.acked.push(settled);
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery, requeue: bool, reason: &str) -> QueueResult<()> {
        {
            let (mut state, settled) = self.settle(delivery).await?;
            if requeue {
                state.enqueue(self.queue, settled.body, settled.attempt + 1);
            } else {
                state.dead_letters.push(DeadLetter {
                    delivery: settled,
                    reason: reason.to_string(),
                });
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
