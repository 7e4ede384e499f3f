//! Subscription validation: send the endpoint a synthetic event.
//!
//! Validation is outbound delivery with a different follow-up. Failures are
//! not routed through the requeue engine; they propagate to the caller and the
//! subscription stays unvalidated until the message is redelivered or the
//! publisher resubmits it. An undecodable subscription is a permanent failure,
//! so the queue consumer quarantines it on the first delivery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use courier_core::{CloudEvent, CodecError, Subscription, Timestamp};
use courier_events::{CloudEventEnvelope, QueueMessage};

use super::{QueueStage, StageError, cancellable};
use crate::storage::SubscriptionRepository;
use crate::webhook::WebhookSender;

/// Type of the synthetic event sent to a subscriber endpoint under validation.
pub const VALIDATION_EVENT_TYPE: &str = "platform.events.validatesubscription";

pub struct Validation {
    webhook: Arc<dyn WebhookSender>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    api_base_url: String,
}

impl Validation {
    pub fn new(
        webhook: Arc<dyn WebhookSender>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            webhook,
            subscriptions,
            api_base_url: api_base_url.into(),
        }
    }

    /// The envelope carries the ephemeral subscription id; the real one is the
    /// last segment of the event source.
    pub fn validation_envelope(&self, subscription: &Subscription) -> CloudEventEnvelope {
        let source = format!(
            "{}/subscriptions/{}",
            self.api_base_url.trim_end_matches('/'),
            subscription.id
        );
        let event = CloudEvent::new(Uuid::new_v4().to_string(), source, VALIDATION_EVENT_TYPE)
            .with_time(Timestamp::now());

        CloudEventEnvelope::for_validation(event, subscription.end_point.clone(), subscription.consumer.clone())
    }

    pub async fn validate(
        &self,
        subscription: &Subscription,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let envelope = self.validation_envelope(subscription);

        if let Err(err) = cancellable(cancel, self.webhook.send(&envelope)).await {
            if !matches!(err, StageError::Cancelled) {
                tracing::warn!(error = %err, "subscription endpoint failed validation");
            }
            return Err(err);
        }

        cancellable(cancel, self.subscriptions.mark_validated(subscription.id)).await?;
        tracing::info!("subscription validated");
        Ok(())
    }
}

/// Queue adapter for [`Validation`]. Errors propagate to the consumer.
pub struct ValidationStage {
    validation: Validation,
}

impl ValidationStage {
    pub fn new(validation: Validation) -> Self {
        Self { validation }
    }
}

#[async_trait]
impl QueueStage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn process(&self, raw: &str, cancel: &CancellationToken) -> Result<(), StageError> {
        let message = QueueMessage::decode(raw);
        let subscription: Subscription =
            serde_json::from_str(message.payload()).map_err(CodecError::from)?;

        let span = tracing::info_span!(
            "stage",
            stage = "validation",
            subscription_id = %subscription.id,
            endpoint = %subscription.end_point,
        );
        self.validation
            .validate(&subscription, cancel)
            .instrument(span)
            .await
    }
}
