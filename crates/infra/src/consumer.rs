//! Queue consumer: the substrate-level processing loop for one stage.
//!
//! The consumer leases one message at a time from a [`QueueSource`] and hands
//! the raw body to a [`QueueStage`]:
//!
//! - `Ok`: the message is deleted
//! - `Err(Cancelled)`: the message is left leased; it reappears when the lease
//!   expires
//! - a permanent `Err` (malformed payload, invalid argument): the raw body is
//!   moved to the poison sink on the spot
//! - any other `Err`: the message is released with the processor-level delay
//!   for its native dequeue count, or moved to the poison sink once the native
//!   count reaches the configured ceiling
//!
//! The native dequeue count is only read from [`ReceivedMessage`]; it is never
//! written into the message body.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_events::{
    Classify, MESSAGE_TTL, QueueError, QueueSink, QueueSource, ReceivedMessage, visibility_delay,
};

use crate::stages::{QueueStage, StageError};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Lease taken on each received message. Must outlast one stage run.
    pub lease: Duration,
    pub max_native_dequeue_count: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(5 * 60),
            max_native_dequeue_count: 12,
        }
    }
}

/// Result of a single [`QueueConsumer::poll_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Completed,
    Released { delay: Duration },
    Poisoned,
    LeftLeased,
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub completed: u64,
    pub released: u64,
    pub poisoned: u64,
}

pub struct QueueConsumer {
    source: Arc<dyn QueueSource>,
    poison: Arc<dyn QueueSink>,
    stage: Arc<dyn QueueStage>,
    config: ConsumerConfig,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl QueueConsumer {
    pub fn new(
        source: Arc<dyn QueueSource>,
        poison: Arc<dyn QueueSink>,
        stage: Arc<dyn QueueStage>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            source,
            poison,
            stage,
            config,
            stats: Arc::new(Mutex::new(ConsumerStats::default())),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Lease and process at most one message.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<PollOutcome, QueueError> {
        let Some(message) = self.source.receive(self.config.lease).await? else {
            return Ok(PollOutcome::Idle);
        };
        self.record(|s| s.received += 1);

        let outcome = match self.stage.process(&message.body, cancel).await {
            Ok(()) => {
                self.source.delete(&message.id).await?;
                self.record(|s| s.completed += 1);
                PollOutcome::Completed
            }
            Err(StageError::Cancelled) => {
                debug!(
                    queue = self.queue(),
                    message_id = %message.id,
                    "stage cancelled, message left leased"
                );
                PollOutcome::LeftLeased
            }
            Err(err) => self.handle_failure(&message, &err).await?,
        };

        Ok(outcome)
    }

    async fn handle_failure(
        &self,
        message: &ReceivedMessage,
        err: &StageError,
    ) -> Result<PollOutcome, QueueError> {
        let permanent = err.failure_kind().is_permanent();
        if permanent || message.dequeue_count >= self.config.max_native_dequeue_count {
            self.poison
                .send(message.body.clone(), Some(Duration::ZERO), Some(MESSAGE_TTL))
                .await?;
            self.source.delete(&message.id).await?;
            self.record(|s| s.poisoned += 1);

            error!(
                queue = self.queue(),
                poison_queue = QueueSink::name(self.poison.as_ref()),
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                permanent,
                error = %err,
                "message moved to poison queue"
            );
            return Ok(PollOutcome::Poisoned);
        }

        let delay = visibility_delay(message.dequeue_count);
        self.source.release(&message.id, delay).await?;
        self.record(|s| s.released += 1);

        warn!(
            queue = self.queue(),
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            delay_secs = delay.as_secs(),
            error = %err,
            "stage failed, message released"
        );
        Ok(PollOutcome::Released { delay })
    }

    fn queue(&self) -> &str {
        QueueSource::name(self.source.as_ref())
    }

    fn record(&self, update: impl FnOnce(&mut ConsumerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(queue = self.queue(), stage = self.stage.name(), "consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.poll_once(&cancel).await {
                Ok(PollOutcome::Idle) => true,
                Ok(_) => false,
                Err(err) => {
                    error!(queue = self.queue(), error = %err, "queue operation failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(queue = self.queue(), stage = self.stage.name(), "consumer stopped");
    }

    /// Run on a background task.
    pub fn spawn(self, cancel: CancellationToken) -> ConsumerHandle {
        let stats = self.stats.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });

        ConsumerHandle { cancel, join, stats }
    }
}

/// Handle to control a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl ConsumerHandle {
    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Request shutdown and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the loop to exit without requesting shutdown.
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            error!(error = %err, "consumer task failed");
        }
    }
}
