use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{CloudEvent, CodecError, CodecResult, SubscriptionId};

/// Delivery envelope: a cloud event addressed to one subscriber.
///
/// This is the unit the outbound stage hands to the webhook sender.
///
/// Notes:
/// - Built by the stage that resolved a subscription match, or by validation.
/// - Never mutated after construction.
/// - `cloud_event` is decoded with the cloud event codec's own rules, so unknown
///   extension attributes survive a trip through the envelope.
/// - Validation envelopes use [`SubscriptionId::EPHEMERAL`]; the real id is
///   embedded in the synthetic event's source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventEnvelope {
    cloud_event: CloudEvent,

    /// When the envelope was queued for outbound delivery.
    pushed: DateTime<Utc>,

    endpoint: String,
    consumer: String,
    subscription_id: SubscriptionId,
}

impl CloudEventEnvelope {
    pub fn new(
        cloud_event: CloudEvent,
        endpoint: impl Into<String>,
        consumer: impl Into<String>,
        subscription_id: SubscriptionId,
    ) -> Self {
        Self {
            cloud_event,
            pushed: Utc::now(),
            endpoint: endpoint.into(),
            consumer: consumer.into(),
            subscription_id,
        }
    }

    /// Envelope for a subscription validation event.
    pub fn for_validation(
        cloud_event: CloudEvent,
        endpoint: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self::new(cloud_event, endpoint, consumer, SubscriptionId::EPHEMERAL)
    }

    /// Override the push timestamp (tests and replays).
    pub fn with_pushed(mut self, pushed: DateTime<Utc>) -> Self {
        self.pushed = pushed;
        self
    }

    pub fn cloud_event(&self) -> &CloudEvent {
        &self.cloud_event
    }

    pub fn pushed(&self) -> DateTime<Utc> {
        self.pushed
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    pub fn into_cloud_event(self) -> CloudEvent {
        self.cloud_event
    }

    pub fn is_validation(&self) -> bool {
        self.subscription_id.is_ephemeral()
    }

    pub fn from_json(raw: &str) -> CodecResult<Self> {
        serde_json::from_str(raw).map_err(CodecError::from)
    }

    pub fn to_json(&self) -> CodecResult<String> {
        serde_json::to_string(self).map_err(CodecError::from)
    }
}
