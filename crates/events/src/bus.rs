//! Message-bus abstraction (mechanics only).
//!
//! The alternative deployment runs each pipeline step as a command handler on a
//! message bus instead of a queue trigger. The bus owns three destinations per
//! command type:
//!
//! - the **live** stream ([`MessageBus::publish`])
//! - a **delayed** redelivery ([`MessageBus::schedule`]), used by the
//!   scheduled retry tier
//! - the **dead-letter** destination ([`MessageBus::dead_letter`])
//!
//! ## Delivery guarantees
//!
//! At-least-once. A message whose handler never reports an outcome (crash,
//! shutdown) is redelivered by the bus once its lock expires, so handlers must
//! be idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_core::CorrelationId;

use crate::backoff::{Classify, FailureKind};
use crate::command::Command;

/// A command in flight on the bus, plus its retry bookkeeping.
///
/// `scheduled_attempts` is the bus-level counter for the scheduled tier. It
/// travels with the message across delayed redeliveries and is unrelated to the
/// queue wrapper's `dequeueCount`.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage<C> {
    id: Uuid,
    command: C,
    correlation_id: CorrelationId,
    scheduled_attempts: u32,
    first_seen: DateTime<Utc>,
}

impl<C: Command> BusMessage<C> {
    pub fn new(command: C) -> Self {
        Self::with_correlation_id(command, CorrelationId::new())
    }

    pub fn with_correlation_id(command: C, correlation_id: CorrelationId) -> Self {
        Self {
            id: Uuid::now_v7(),
            command,
            correlation_id,
            scheduled_attempts: 0,
            first_seen: Utc::now(),
        }
    }

    /// Follow-up command in the same correlation chain.
    pub fn follow_up<N: Command>(&self, command: N) -> BusMessage<N> {
        BusMessage::with_correlation_id(command, self.correlation_id.clone())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn scheduled_attempts(&self) -> u32 {
        self.scheduled_attempts
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// Same message after one more scheduled retry.
    pub fn rescheduled(&self) -> Self {
        Self {
            scheduled_attempts: self.scheduled_attempts.saturating_add(1),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("bus rejected `{command}` message: {message}")]
    Rejected {
        command: &'static str,
        message: String,
    },

    /// Internal lock poisoning (in-memory implementations).
    #[error("message bus is unavailable")]
    Unavailable,
}

impl Classify for BusError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Queue
    }
}

#[async_trait]
pub trait MessageBus<C: Command>: Send + Sync {
    async fn publish(&self, message: BusMessage<C>) -> Result<(), BusError>;

    /// Redeliver `message` after `delay`.
    async fn schedule(&self, message: BusMessage<C>, delay: Duration) -> Result<(), BusError>;

    async fn dead_letter(&self, message: BusMessage<C>, reason: String) -> Result<(), BusError>;
}

#[async_trait]
impl<C, B> MessageBus<C> for Arc<B>
where
    C: Command,
    B: MessageBus<C> + ?Sized,
{
    async fn publish(&self, message: BusMessage<C>) -> Result<(), BusError> {
        (**self).publish(message).await
    }

    async fn schedule(&self, message: BusMessage<C>, delay: Duration) -> Result<(), BusError> {
        (**self).schedule(message, delay).await
    }

    async fn dead_letter(&self, message: BusMessage<C>, reason: String) -> Result<(), BusError> {
        (**self).dead_letter(message, reason).await
    }
}
