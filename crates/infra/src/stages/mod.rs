//! Pipeline stage handlers.
//!
//! ```text
//! registration ──▶ inbound ──▶ outbound ──▶ subscriber webhook
//!                                           (one per matched subscription)
//! validation ──▶ subscriber webhook ──▶ mark validated
//! ```
//!
//! Each stage's business step ([`Registration`], [`Inbound`], [`Outbound`],
//! [`Validation`]) is transport-agnostic: it takes a typed input, a
//! correlation id and a cancellation token, and hands its output to a
//! [`Forward`] implementation. Two transports wrap those steps:
//!
//! - queue triggers: [`RetryingStage`] decodes the queue body, runs the step and
//!   funnels any failure into the [`RequeueEngine`]; [`ValidationStage`] lets
//!   failures propagate to the consumer instead
//! - message bus: the command handlers in [`crate::bus_handlers`]
//!
//! ## Cancellation
//!
//! Every collaborator call is raced against the token. On cancellation a step
//! returns [`StageError::Cancelled`]; queue stages pass it up without touching
//! the requeue engine, so the message stays leased until its visibility
//! timeout expires.

pub mod inbound;
pub mod outbound;
pub mod registration;
pub mod validation;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use courier_core::{CloudEvent, CodecError, CorrelationId};
use courier_events::{
    BusError, BusMessage, Classify, CloudEventEnvelope, Command, FailureKind, MessageBus,
    QueueError, QueueMessage, QueueSink, RetryableEventWrapper, SendToOutbound, SendToSubscriber,
};

use crate::requeue::RequeueEngine;
use crate::storage::StorageError;
use crate::webhook::WebhookError;

pub use inbound::Inbound;
pub use outbound::Outbound;
pub use registration::Registration;
pub use validation::{VALIDATION_EVENT_TYPE, Validation, ValidationStage};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("stage cancelled")]
    Cancelled,
}

impl Classify for StageError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            StageError::Codec(e) => e.failure_kind(),
            StageError::Webhook(e) => e.failure_kind(),
            StageError::Storage(e) => e.failure_kind(),
            StageError::Queue(e) => e.failure_kind(),
            StageError::Bus(e) => e.failure_kind(),
            StageError::InvalidArgument(_) => FailureKind::InvalidArgument,
            StageError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StageError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

/// Hands a stage's output to the next stage.
#[async_trait]
pub trait Forward<T: Send + Sync + 'static>: Send + Sync {
    async fn forward(&self, item: T, correlation_id: &CorrelationId) -> Result<(), StageError>;
}

/// Serialized form of a stage output on a queue.
pub trait QueuePayload {
    fn to_payload(&self) -> Result<String, CodecError>;
}

impl QueuePayload for CloudEvent {
    fn to_payload(&self) -> Result<String, CodecError> {
        self.to_json()
    }
}

impl QueuePayload for CloudEventEnvelope {
    fn to_payload(&self) -> Result<String, CodecError> {
        self.to_json()
    }
}

/// Forwards to the next stage's queue in a fresh wrapper that keeps the
/// correlation id.
#[derive(Clone)]
pub struct QueueForwarder {
    sink: Arc<dyn QueueSink>,
}

impl QueueForwarder {
    pub fn new(sink: Arc<dyn QueueSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<T> Forward<T> for QueueForwarder
where
    T: QueuePayload + Send + Sync + 'static,
{
    async fn forward(&self, item: T, correlation_id: &CorrelationId) -> Result<(), StageError> {
        let wrapper = RetryableEventWrapper::new(item.to_payload()?, correlation_id.clone());
        self.sink.send(wrapper.to_json()?, None, None).await?;
        Ok(())
    }
}

/// Builds the next command from a stage output.
pub trait IntoCommand<T>: Command {
    fn from_output(item: T) -> Self;
}

impl IntoCommand<CloudEvent> for SendToOutbound {
    fn from_output(event: CloudEvent) -> Self {
        SendToOutbound { event }
    }
}

impl IntoCommand<CloudEventEnvelope> for SendToSubscriber {
    fn from_output(envelope: CloudEventEnvelope) -> Self {
        SendToSubscriber { envelope }
    }
}

/// Forwards by publishing the next command on the message bus.
pub struct BusForwarder<C: Command> {
    bus: Arc<dyn MessageBus<C>>,
    _command: PhantomData<fn() -> C>,
}

impl<C: Command> BusForwarder<C> {
    pub fn new(bus: Arc<dyn MessageBus<C>>) -> Self {
        Self {
            bus,
            _command: PhantomData,
        }
    }
}

#[async_trait]
impl<T, C> Forward<T> for BusForwarder<C>
where
    T: Send + Sync + 'static,
    C: IntoCommand<T>,
{
    async fn forward(&self, item: T, correlation_id: &CorrelationId) -> Result<(), StageError> {
        let message = BusMessage::with_correlation_id(C::from_output(item), correlation_id.clone());
        self.bus.publish(message).await?;
        Ok(())
    }
}

/// A stage driven by a queue trigger.
#[async_trait]
pub trait QueueStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process one raw queue body. `Ok` acknowledges the message; `Err` leaves
    /// redelivery to the queue substrate.
    async fn process(&self, raw: &str, cancel: &CancellationToken) -> Result<(), StageError>;
}

/// A transport-agnostic stage step that consumes a serialized payload.
#[async_trait]
pub trait PayloadStep: Send + Sync {
    const NAME: &'static str;

    async fn run(
        &self,
        payload: &str,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<(), StageError>;
}

/// Queue adapter that funnels every failure into the requeue engine.
///
/// Legacy bare bodies get a synthesized wrapper before the step runs, so a
/// retry of a legacy message looks like any other first attempt.
pub struct RetryingStage<S> {
    step: S,
    engine: RequeueEngine,
}

impl<S: PayloadStep> RetryingStage<S> {
    pub fn new(step: S, engine: RequeueEngine) -> Self {
        Self { step, engine }
    }

    pub fn step(&self) -> &S {
        &self.step
    }
}

#[async_trait]
impl<S: PayloadStep> QueueStage for RetryingStage<S> {
    fn name(&self) -> &'static str {
        S::NAME
    }

    async fn process(&self, raw: &str, cancel: &CancellationToken) -> Result<(), StageError> {
        let message = QueueMessage::decode(raw);
        if message.is_legacy() {
            tracing::debug!(stage = S::NAME, "legacy message without retry wrapper");
        }
        let wrapper = message.into_wrapper();

        let span = tracing::info_span!(
            "stage",
            stage = S::NAME,
            correlation_id = %wrapper.correlation_id(),
            dequeue_count = wrapper.dequeue_count(),
        );

        match self
            .step
            .run(wrapper.payload(), wrapper.correlation_id(), cancel)
            .instrument(span.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(StageError::Cancelled) => Err(StageError::Cancelled),
            Err(err) => {
                self.engine
                    .requeue_with_backoff(&wrapper, &err)
                    .instrument(span)
                    .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Records forwarded items; optionally fails.
    pub struct RecordingForward<T> {
        pub items: Mutex<Vec<(T, CorrelationId)>>,
        pub failing: Mutex<usize>,
    }

    impl<T> Default for RecordingForward<T> {
        fn default() -> Self {
            Self {
                items: Mutex::new(Vec::new()),
                failing: Mutex::new(0),
            }
        }
    }

    impl<T: Clone> RecordingForward<T> {
        pub fn items(&self) -> Vec<(T, CorrelationId)> {
            self.items.lock().unwrap().clone()
        }

        pub fn fail_next(&self, count: usize) {
            *self.failing.lock().unwrap() = count;
        }
    }

    #[async_trait]
    impl<T> Forward<T> for RecordingForward<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        async fn forward(&self, item: T, correlation_id: &CorrelationId) -> Result<(), StageError> {
            {
                let mut failing = self.failing.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(StageError::Queue(QueueError::Unavailable("next".to_string())));
                }
            }
            self.items.lock().unwrap().push((item, correlation_id.clone()));
            Ok(())
        }
    }
}
