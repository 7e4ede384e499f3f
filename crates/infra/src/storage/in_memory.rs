use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use courier_core::{CloudEvent, Subscription, SubscriptionId};

use super::{EventRepository, StorageError, SubscriptionRepository};

#[derive(Debug, Default)]
struct EventTable {
    events: Vec<CloudEvent>,
    failing_saves: usize,
}

/// In-memory event repository.
///
/// Intended for tests/dev. Keeps events in registration order.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    table: RwLock<EventTable>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CloudEvent> {
        self.table
            .read()
            .map(|t| t.events.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<CloudEvent> {
        self.table
            .read()
            .ok()?
            .events
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    /// Make the next `count` saves fail.
    pub fn fail_next_saves(&self, count: usize) {
        if let Ok(mut t) = self.table.write() {
            t.failing_saves = count;
        }
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn save(&self, event: &CloudEvent) -> Result<(), StorageError> {
        let mut t = self.table.write().map_err(|_| StorageError::Unavailable)?;

        if t.failing_saves > 0 {
            t.failing_saves -= 1;
            return Err(StorageError::Database {
                operation: "save_event",
                message: "injected failure".to_string(),
            });
        }

        if !t.events.iter().any(|e| e.id() == event.id()) {
            t.events.push(event.clone());
        }
        Ok(())
    }
}

/// In-memory subscription repository.
///
/// `candidates` returns every stored subscription; filtering is left to the
/// matcher.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) {
        if let Ok(mut subs) = self.subscriptions.write() {
            subs.insert(subscription.id, subscription);
        }
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions.read().ok()?.get(&id).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn candidates(&self, _event: &CloudEvent) -> Result<Vec<Subscription>, StorageError> {
        let subs = self.subscriptions.read().map_err(|_| StorageError::Unavailable)?;
        Ok(subs.values().cloned().collect())
    }

    async fn mark_validated(&self, id: SubscriptionId) -> Result<(), StorageError> {
        let mut subs = self.subscriptions.write().map_err(|_| StorageError::Unavailable)?;
        let sub = subs
            .get_mut(&id)
            .ok_or(StorageError::SubscriptionNotFound(id))?;
        sub.validated = true;
        Ok(())
    }
}
