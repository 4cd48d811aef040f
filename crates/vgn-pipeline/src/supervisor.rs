//! Consumer supervisor.
//!
//! Runs one consume loop per stage output queue. A loop that dies (dropped
//! connection, closed channel, failed ack) is restarted after a fixed
//! backoff, forever, until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use vgn_queue::{BrokerConnection, BrokerQueue, Consumer, Delivery};

use crate::consumer::StageHandler;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::{self, DeliveryOutcome};

/// Owns the consumer tasks and the shutdown signal.
pub struct ConsumerSupervisor {
    connection: Arc<BrokerConnection>,
    handlers: Vec<Arc<dyn StageHandler>>,
    consumer_name: String,
    backoff: Duration,
    shutdown_timeout: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<WorkerTasks>,
}

#[derive(Default)]
struct WorkerTasks {
    set: JoinSet<()>,
    running: Vec<RunningWorker>,
}

struct RunningWorker {
    queue: BrokerQueue,
    /// Set while a delivery is being handled and settled
    busy: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl ConsumerSupervisor {
    pub fn new(
        connection: Arc<BrokerConnection>,
        handlers: Vec<Arc<dyn StageHandler>>,
        consumer_name: impl Into<String>,
        backoff: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            connection,
            handlers,
            consumer_name: consumer_name.into(),
            backoff,
            shutdown_timeout,
            shutdown,
            tasks: Mutex::new(WorkerTasks::default()),
        }
    }

    /// Spawn one supervised loop per handler. Ignored once loops are
    /// running or shutdown has been requested.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if self.is_shutting_down() {
            warn!("Not starting consumers during shutdown");
            return;
        }
        if !tasks.running.is_empty() {
            debug!("Consumers already started");
            return;
        }

        for handler in &self.handlers {
            let busy = Arc::new(AtomicBool::new(false));
            let worker = StageWorker {
                connection: Arc::clone(&self.connection),
                handler: Arc::clone(handler),
                consumer_tag: format!("{}-{}", self.consumer_name, handler.queue()),
                message_timeout: self.connection.config().message_timeout,
                backoff: self.backoff,
                busy: Arc::clone(&busy),
            };
            let shutdown_rx = self.shutdown.subscribe();
            info!(queue = %handler.queue(), "Starting consumer loop");
            let abort = tasks.set.spawn(worker.run(shutdown_rx));
            tasks.running.push(RunningWorker {
                queue: handler.queue(),
                busy,
                abort,
            });
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop every loop, then close the connection.
    ///
    /// Idle loops get `shutdown_timeout` to exit before they are aborted. A
    /// loop in the middle of a delivery is never aborted; it settles the
    /// delivery first. Calls after the first are no-ops.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            debug!("Shutdown already requested");
            return;
        }
        info!("Shutting down consumers");

        let mut tasks = self.tasks.lock().await;
        let drained = tokio::time::timeout(self.shutdown_timeout, join_all(&mut tasks.set)).await;

        if drained.is_err() {
            let mut in_flight = Vec::new();
            for worker in &tasks.running {
                if worker.busy.load(Ordering::SeqCst) {
                    in_flight.push(worker.queue.as_str());
                } else {
                    worker.abort.abort();
                }
            }
            warn!(
                timeout = ?self.shutdown_timeout,
                ?in_flight,
                "Consumers did not stop in time, aborting idle loops"
            );
            join_all(&mut tasks.set).await;
        }

        self.connection.close().await;
        info!("Consumers stopped");
    }
}

async fn join_all(set: &mut JoinSet<()>) {
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            if !e.is_cancelled() {
                error!("Consumer task failed: {}", e);
            }
        }
    }
}

/// Marks a worker busy until dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Resolves once shutdown is requested or the supervisor is gone.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown_rx.borrow_and_update();
        if stop || shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// One stage's consume loop.
struct StageWorker {
    connection: Arc<BrokerConnection>,
    handler: Arc<dyn StageHandler>,
    consumer_tag: String,
    message_timeout: Duration,
    backoff: Duration,
    busy: Arc<AtomicBool>,
}

impl StageWorker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let stage = self.handler.stage();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.consume(&mut shutdown_rx).await {
                Ok(()) => break,
                Err(e) => {
                    error!(stage, error = %e, backoff = ?self.backoff, "Consumer loop failed, restarting");
                    metrics::record_consumer_restart(stage);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = stopped(&mut shutdown_rx) => break,
            }
        }
        info!(stage, "Consumer loop stopped");
    }

    /// Returns `Ok` only on shutdown.
    async fn consume(&self, shutdown_rx: &mut watch::Receiver<bool>) -> PipelineResult<()> {
        let mut consumer = tokio::select! {
            biased;
            _ = stopped(shutdown_rx) => return Ok(()),
            consumer = self.register() => consumer?,
        };
        info!(queue = %self.handler.queue(), tag = %self.consumer_tag, "Consumer registered");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = stopped(shutdown_rx) => return Ok(()),
                delivery = consumer.recv() => delivery?,
            };
            let _busy = BusyGuard::enter(&self.busy);
            self.process(consumer.as_mut(), delivery).await?;
        }
    }

    async fn register(&self) -> PipelineResult<Box<dyn Consumer>> {
        self.connection.ensure_connection().await?;
        Ok(self
            .connection
            .consume(self.handler.queue(), &self.consumer_tag)
            .await?)
    }

    async fn process(&self, consumer: &mut dyn Consumer, delivery: Delivery) -> PipelineResult<()> {
        let stage = self.handler.stage();
        let started = Instant::now();

        let result = match tokio::time::timeout(self.message_timeout, self.handler.handle(&delivery)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(self.message_timeout)),
        };

        let outcome = match result {
            Ok(()) => {
                consumer.ack(&delivery).await?;
                DeliveryOutcome::Ack
            }
            Err(e) if e.is_permanent() => {
                error!(stage, message_id = %delivery.id, error = %e, "Dead-lettering message");
                consumer.nack(&delivery, false, &e.to_string()).await?;
                DeliveryOutcome::DeadLetter
            }
            Err(e) => {
                warn!(
                    stage,
                    message_id = %delivery.id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Processing failed, requeueing"
                );
                consumer.nack(&delivery, true, &e.to_string()).await?;
                DeliveryOutcome::Requeue
            }
        };

        metrics::record_delivery(stage, outcome, started.elapsed().as_secs_f64());
        Ok(())
    }
}
