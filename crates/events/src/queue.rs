//! Queue abstraction (mechanics only).
//!
//! The pipeline assumes one queue technology per deployment with two
//! queue-level properties: a per-message **visibility timeout** and a
//! **native dequeue count**. These traits expose exactly that and nothing more.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a leased message that is never deleted becomes visible
//!   again once its lease expires
//! - **No ordering**: messages may be received in any order
//! - **TTL**: a message older than its time-to-live may be purged by the queue
//!
//! ## Sinks vs. sources
//!
//! Stage handlers only ever *send* ([`QueueSink`]): to the next stage, back to
//! their own queue with a delay, or to the poison queue. Receiving
//! ([`QueueSource`]) belongs to the consumer loop that plays the role of the
//! queue trigger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Suffix appended to a main queue name to form its poison queue.
pub const POISON_SUFFIX: &str = "-poison";

/// Name of the poison queue paired with `main`.
pub fn poison_queue_name(main: &str) -> String {
    format!("{main}{POISON_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("send to `{queue}` failed: {message}")]
    Send { queue: String, message: String },

    #[error("receive from `{queue}` failed: {message}")]
    Receive { queue: String, message: String },

    #[error("delete from `{queue}` failed: {message}")]
    Delete { queue: String, message: String },

    #[error("release on `{queue}` failed: {message}")]
    Release { queue: String, message: String },

    #[error("connection to `{queue}` failed: {message}")]
    Connect { queue: String, message: String },

    #[error("message `{id}` not found in `{queue}`")]
    NotFound { queue: String, id: String },

    /// Internal lock poisoning (in-memory implementations).
    #[error("queue `{0}` is unavailable")]
    Unavailable(String),
}

/// A message leased from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Queue-assigned handle used to delete or release the lease.
    pub id: String,
    pub body: String,
    /// Substrate-native dequeue count (1 on first receive). Never written
    /// into the message body.
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
}

/// Write side of a queue.
#[async_trait]
pub trait QueueSink: Send + Sync {
    /// Queue name (used for logging and poison naming).
    fn name(&self) -> &str;

    /// Enqueue `message`, invisible for `visibility_timeout` (immediately
    /// visible when `None`) and purgeable after `time_to_live`.
    async fn send(
        &self,
        message: String,
        visibility_timeout: Option<Duration>,
        time_to_live: Option<Duration>,
    ) -> Result<(), QueueError>;
}

/// Read side of a queue.
#[async_trait]
pub trait QueueSource: Send + Sync {
    fn name(&self) -> &str;

    /// Lease the next visible message for `lease`. Increments the native
    /// dequeue count.
    async fn receive(&self, lease: Duration) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Acknowledge: remove the message permanently.
    async fn delete(&self, id: &str) -> Result<(), QueueError>;

    /// Give up the lease; the message becomes visible after `visibility_timeout`.
    async fn release(&self, id: &str, visibility_timeout: Duration) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> QueueSink for Arc<Q>
where
    Q: QueueSink + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(
        &self,
        message: String,
        visibility_timeout: Option<Duration>,
        time_to_live: Option<Duration>,
    ) -> Result<(), QueueError> {
        (**self).send(message, visibility_timeout, time_to_live).await
    }
}

#[async_trait]
impl<Q> QueueSource for Arc<Q>
where
    Q: QueueSource + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn receive(&self, lease: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        (**self).receive(lease).await
    }

    async fn delete(&self, id: &str) -> Result<(), QueueError> {
        (**self).delete(id).await
    }

    async fn release(&self, id: &str, visibility_timeout: Duration) -> Result<(), QueueError> {
        (**self).release(id, visibility_timeout).await
    }
}
