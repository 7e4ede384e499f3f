//! Side-effecting pieces of the delivery pipeline: settings, the requeue
//! engine, webhook delivery, storage, stage handlers and the queue consumer.

pub mod bus_handlers;
pub mod config;
pub mod consumer;
pub mod matcher;
#[cfg(feature = "redis")]
pub mod redis_queue;
pub mod requeue;
pub mod stages;
pub mod storage;
pub mod webhook;

pub use config::{ConfigError, QueueBackend, QueueNames, Settings, StorageBackend};
pub use consumer::{ConsumerConfig, ConsumerHandle, ConsumerStats, PollOutcome, QueueConsumer};
pub use requeue::{QuarantineReason, RequeueEngine, RequeueOutcome};
pub use stages::{QueueStage, RetryingStage, StageError};
pub use webhook::{HttpWebhookSender, WebhookConfig, WebhookError, WebhookSender};
