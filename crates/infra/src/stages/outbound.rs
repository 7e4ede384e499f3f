//! Outbound: push one envelope to its subscriber.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use courier_core::CorrelationId;
use courier_events::CloudEventEnvelope;

use super::{PayloadStep, StageError, cancellable};
use crate::webhook::WebhookSender;

pub struct Outbound {
    webhook: Arc<dyn WebhookSender>,
}

impl Outbound {
    pub fn new(webhook: Arc<dyn WebhookSender>) -> Self {
        Self { webhook }
    }

    #[instrument(
        skip_all,
        fields(
            event_id = envelope.cloud_event().id(),
            subscription_id = %envelope.subscription_id(),
            endpoint = envelope.endpoint(),
        )
    )]
    pub async fn deliver(
        &self,
        envelope: &CloudEventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        cancellable(cancel, self.webhook.send(envelope)).await?;
        tracing::debug!("event pushed to subscriber");
        Ok(())
    }
}

#[async_trait]
impl PayloadStep for Outbound {
    const NAME: &'static str = "outbound";

    async fn run(
        &self,
        payload: &str,
        _correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let envelope = CloudEventEnvelope::from_json(payload)?;
        self.deliver(&envelope, cancel).await
    }
}
