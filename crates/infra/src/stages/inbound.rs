//! Inbound: resolve matching subscriptions, one outbound envelope each.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use courier_core::{CloudEvent, CorrelationId};
use courier_events::CloudEventEnvelope;

use super::{Forward, PayloadStep, StageError, cancellable};
use crate::matcher;
use crate::storage::SubscriptionRepository;

pub struct Inbound {
    subscriptions: Arc<dyn SubscriptionRepository>,
    next: Arc<dyn Forward<CloudEventEnvelope>>,
}

impl Inbound {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        next: Arc<dyn Forward<CloudEventEnvelope>>,
    ) -> Self {
        Self { subscriptions, next }
    }

    /// Returns the number of envelopes forwarded.
    ///
    /// A failure part-way through retries the whole fan-out; subscribers that
    /// were already served may see the event twice.
    #[instrument(skip_all, fields(event_id = event.id(), correlation_id = %correlation_id))]
    pub async fn dispatch(
        &self,
        event: CloudEvent,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<usize, StageError> {
        let candidates = cancellable(cancel, self.subscriptions.candidates(&event)).await?;
        let matched = matcher::matching(candidates, &event);

        for subscription in &matched {
            let envelope = CloudEventEnvelope::new(
                event.clone(),
                subscription.end_point.clone(),
                subscription.consumer.clone(),
                subscription.id,
            );
            cancellable(cancel, self.next.forward(envelope, correlation_id)).await?;
        }

        tracing::debug!(matched = matched.len(), "event dispatched");
        Ok(matched.len())
    }
}

#[async_trait]
impl PayloadStep for Inbound {
    const NAME: &'static str = "inbound";

    async fn run(
        &self,
        payload: &str,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let event = CloudEvent::from_json(payload)?;
        self.dispatch(event, correlation_id, cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{Subscription, SubscriptionId};

    use super::*;
    use crate::stages::test_support::RecordingForward;
    use crate::storage::InMemorySubscriptionRepository;

    fn subscription(id: i64, endpoint: &str) -> Subscription {
        Subscription::new(SubscriptionId::new(id), endpoint, format!("/org/{id}"), "/org/ttd").validated()
    }

    #[tokio::test]
    async fn one_envelope_per_matched_subscription() {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        subscriptions.insert(subscription(1, "https://a.example/hook"));
        subscriptions.insert(subscription(2, "https://b.example/hook").with_type_filter("app.instance.created"));
        subscriptions.insert(subscription(3, "https://c.example/hook").with_type_filter("other"));
        let next = Arc::new(RecordingForward::default());
        let stage = Inbound::new(subscriptions, next.clone());

        let event = CloudEvent::new("1", "/ttd/app", "app.instance.created");
        let count = stage
            .dispatch(event.clone(), &CorrelationId::from("c1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(count, 2);
        let forwarded = next.items();
        let endpoints: Vec<_> = forwarded.iter().map(|(e, _)| e.endpoint().to_string()).collect();
        assert_eq!(endpoints, ["https://a.example/hook", "https://b.example/hook"]);

        let (envelope, correlation) = &forwarded[1];
        assert_eq!(envelope.cloud_event(), &event);
        assert_eq!(envelope.subscription_id(), SubscriptionId::new(2));
        assert_eq!(envelope.consumer(), "/org/2");
        assert_eq!(correlation.as_str(), "c1");
    }

    #[tokio::test]
    async fn no_matches_is_not_an_error() {
        let stage = Inbound::new(
            Arc::new(InMemorySubscriptionRepository::new()),
            Arc::new(RecordingForward::default()),
        );

        let count = stage
            .dispatch(CloudEvent::new("1", "/s", "t"), &CorrelationId::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn forward_failure_surfaces() {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        subscriptions.insert(subscription(1, "https://a.example/hook"));
        let next = Arc::new(RecordingForward::default());
        next.fail_next(1);
        let stage = Inbound::new(subscriptions, next);

        let err = stage
            .dispatch(CloudEvent::new("1", "/s", "t"), &CorrelationId::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Queue(_)));
    }
}
