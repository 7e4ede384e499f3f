//! In-memory message bus for tests/dev.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::{BusError, BusMessage, MessageBus};
use crate::command::Command;

#[derive(Debug)]
struct Destinations<C> {
    published: Vec<BusMessage<C>>,
    scheduled: Vec<(BusMessage<C>, Duration)>,
    dead_lettered: Vec<(BusMessage<C>, String)>,
}

impl<C> Default for Destinations<C> {
    fn default() -> Self {
        Self {
            published: Vec::new(),
            scheduled: Vec::new(),
            dead_lettered: Vec::new(),
        }
    }
}

/// Records every message per destination.
///
/// - No IO, no timers: scheduled messages are stored with their delay and never
///   redelivered by the bus itself
/// - Inspection helpers return clones
#[derive(Debug)]
pub struct InMemoryMessageBus<C> {
    destinations: Mutex<Destinations<C>>,
}

impl<C> InMemoryMessageBus<C> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> Default for InMemoryMessageBus<C> {
    fn default() -> Self {
        Self {
            destinations: Mutex::new(Destinations::default()),
        }
    }
}

impl<C: Clone> InMemoryMessageBus<C> {
    pub fn published(&self) -> Vec<BusMessage<C>> {
        self.destinations
            .lock()
            .map(|d| d.published.clone())
            .unwrap_or_default()
    }

    pub fn scheduled(&self) -> Vec<(BusMessage<C>, Duration)> {
        self.destinations
            .lock()
            .map(|d| d.scheduled.clone())
            .unwrap_or_default()
    }

    pub fn dead_lettered(&self) -> Vec<(BusMessage<C>, String)> {
        self.destinations
            .lock()
            .map(|d| d.dead_lettered.clone())
            .unwrap_or_default()
    }

    /// Remove and return everything published so far.
    pub fn drain_published(&self) -> Vec<BusMessage<C>> {
        self.destinations
            .lock()
            .map(|mut d| std::mem::take(&mut d.published))
            .unwrap_or_default()
    }
}

#[async_trait]
impl<C: Command> MessageBus<C> for InMemoryMessageBus<C> {
    async fn publish(&self, message: BusMessage<C>) -> Result<(), BusError> {
        let mut d = self.destinations.lock().map_err(|_| BusError::Unavailable)?;
        d.published.push(message);
        Ok(())
    }

    async fn schedule(&self, message: BusMessage<C>, delay: Duration) -> Result<(), BusError> {
        let mut d = self.destinations.lock().map_err(|_| BusError::Unavailable)?;
        d.scheduled.push((message, delay));
        Ok(())
    }

    async fn dead_letter(&self, message: BusMessage<C>, reason: String) -> Result<(), BusError> {
        let mut d = self.destinations.lock().map_err(|_| BusError::Unavailable)?;
        d.dead_lettered.push((message, reason));
        Ok(())
    }
}
