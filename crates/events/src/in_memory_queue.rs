//! In-memory visibility-timeout queue for tests/dev.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::queue::{QueueError, QueueSink, QueueSource, ReceivedMessage};

/// Record of a `send` call, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub body: String,
    pub visibility_timeout: Option<Duration>,
    pub time_to_live: Option<Duration>,
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    visible_at: Instant,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<StoredMessage>,
    sent: Vec<SentMessage>,
    failing_sends: usize,
}

/// In-memory queue with visibility timeouts and native dequeue counts.
///
/// - No IO
/// - Time is `tokio::time::Instant`, so tests can pause/advance the clock
/// - Every `send` is also recorded in [`InMemoryQueue::sent`]
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Every message ever sent, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner
            .lock()
            .map(|inner| inner.sent.clone())
            .unwrap_or_default()
    }

    /// Number of stored messages (visible or leased).
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_sends = count;
        }
    }

    fn unavailable(&self) -> QueueError {
        QueueError::Unavailable(self.name.clone())
    }
}

#[async_trait]
impl QueueSink for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        message: String,
        visibility_timeout: Option<Duration>,
        time_to_live: Option<Duration>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().map_err(|_| self.unavailable())?;

        if inner.failing_sends > 0 {
            inner.failing_sends -= 1;
            return Err(QueueError::Send {
                queue: self.name.clone(),
                message: "injected failure".to_string(),
            });
        }

        let now = Instant::now();
        inner.sent.push(SentMessage {
            body: message.clone(),
            visibility_timeout,
            time_to_live,
        });
        inner.messages.push(StoredMessage {
            id: Uuid::now_v7().to_string(),
            body: message,
            dequeue_count: 0,
            inserted_at: Utc::now(),
            visible_at: now + visibility_timeout.unwrap_or_default(),
            expires_at: time_to_live.map(|ttl| now + ttl),
        });

        Ok(())
    }
}

#[async_trait]
impl QueueSource for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, lease: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut inner = self.inner.lock().map_err(|_| self.unavailable())?;
        let now = Instant::now();

        inner
            .messages
            .retain(|m| m.expires_at.is_none_or(|expires| expires > now));

        let Some(message) = inner.messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        message.dequeue_count += 1;
        message.visible_at = now + lease;

        Ok(Some(ReceivedMessage {
            id: message.id.clone(),
            body: message.body.clone(),
            dequeue_count: message.dequeue_count,
            inserted_at: message.inserted_at,
        }))
    }

    async fn delete(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().map_err(|_| self.unavailable())?;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != id);

        if inner.messages.len() == before {
            return Err(QueueError::NotFound {
                queue: self.name.clone(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn release(&self, id: &str, visibility_timeout: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().map_err(|_| self.unavailable())?;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| QueueError::NotFound {
                queue: self.name.clone(),
                id: id.to_string(),
            })?;

        message.visible_at = Instant::now() + visibility_timeout;
        Ok(())
    }
}
