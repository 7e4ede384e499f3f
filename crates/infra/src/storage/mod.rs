//! Persistence collaborators used by the stage handlers.
//!
//! - [`EventRepository`]: durable record of every registered cloud event
//! - [`SubscriptionRepository`]: subscription lookup and validation state
//!
//! Both come in an in-memory flavor (tests/dev) and a Postgres flavor.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use courier_core::{CloudEvent, Subscription, SubscriptionId};
use courier_events::{Classify, FailureKind};

pub use in_memory::{InMemoryEventRepository, InMemorySubscriptionRepository};
pub use postgres::{PostgresEventRepository, PostgresSubscriptionRepository, apply_schema};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    #[error("stored row could not be decoded: {0}")]
    InvalidRow(String),

    /// Internal lock poisoning (in-memory implementations).
    #[error("storage is unavailable")]
    Unavailable,
}

impl Classify for StorageError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Storage
    }
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Persist `event`. Saving an event id that already exists is a no-op.
    async fn save(&self, event: &CloudEvent) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Subscriptions that may match `event`. Callers apply
    /// [`crate::matcher::matching`] for the exact decision.
    async fn candidates(&self, event: &CloudEvent) -> Result<Vec<Subscription>, StorageError>;

    async fn mark_validated(&self, id: SubscriptionId) -> Result<(), StorageError>;
}
