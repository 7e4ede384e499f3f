//! Delivery messaging mechanics (no IO).
//!
//! - Wire envelopes that carry a cloud event between pipeline stages
//! - Retry wrapper and the legacy/new payload decode fork
//! - Backoff schedule and failure classification
//! - Queue sink/source abstractions (+ in-memory implementation)
//! - Command-handler retry chain for the message-bus deployment

pub mod backoff;
pub mod bus;
pub mod command;
pub mod envelope;
pub mod handler;
pub mod in_memory_bus;
pub mod in_memory_queue;
pub mod queue;
pub mod retry_chain;
pub mod runner;
pub mod wrapper;

pub use backoff::{
    Classification, Classify, FailureKind, MAX_DEQUEUE_COUNT, MESSAGE_TTL, visibility_delay,
};
pub use bus::{BusError, BusMessage, MessageBus};
pub use command::{Command, RegisterEvent, SendToOutbound, SendToSubscriber, ValidateSubscription};
pub use envelope::CloudEventEnvelope;
pub use handler::CommandHandler;
pub use in_memory_bus::InMemoryMessageBus;
pub use in_memory_queue::{InMemoryQueue, SentMessage};
pub use queue::{QueueError, QueueSink, QueueSource, ReceivedMessage, poison_queue_name};
pub use retry_chain::{RetryChain, RetryChainBuilder, RetryChainError, RetryDecision, RetryTiers};
pub use runner::{CommandOutcome, CommandRunner};
pub use courier_core::Timestamp;
pub use wrapper::{QueueMessage, RetryableEventWrapper};
