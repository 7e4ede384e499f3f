//! Registration: normalize, persist, hand over to inbound.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use courier_core::{CloudEvent, CorrelationId, normalize_resource};

use super::{Forward, PayloadStep, StageError, cancellable};
use crate::storage::EventRepository;

pub struct Registration {
    events: Arc<dyn EventRepository>,
    next: Arc<dyn Forward<CloudEvent>>,
}

impl Registration {
    pub fn new(events: Arc<dyn EventRepository>, next: Arc<dyn Forward<CloudEvent>>) -> Self {
        Self { events, next }
    }

    /// Save is idempotent on event id, so a retry after a failed forward
    /// re-runs the whole step safely.
    #[instrument(skip_all, fields(event_id = event.id(), correlation_id = %correlation_id))]
    pub async fn register(
        &self,
        event: CloudEvent,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let event = normalize_resource(event);

        cancellable(cancel, self.events.save(&event)).await?;
        cancellable(cancel, self.next.forward(event, correlation_id)).await?;

        tracing::debug!("event registered");
        Ok(())
    }
}

#[async_trait]
impl PayloadStep for Registration {
    const NAME: &'static str = "registration";

    async fn run(
        &self,
        payload: &str,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let event = CloudEvent::from_json(payload)?;
        self.register(event, correlation_id, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::RecordingForward;
    use crate::storage::InMemoryEventRepository;

    fn registration() -> (Registration, Arc<InMemoryEventRepository>, Arc<RecordingForward<CloudEvent>>) {
        let events = Arc::new(InMemoryEventRepository::new());
        let next = Arc::new(RecordingForward::default());
        (Registration::new(events.clone(), next.clone()), events, next)
    }

    #[tokio::test]
    async fn legacy_resource_is_normalized_before_persisting() {
        let (stage, events, next) = registration();
        let event = CloudEvent::new("1", "/orgname/appname/instances/50001/abc", "app.instance.created")
            .with_resource("urn:altinn:resource:altinnapp.orgname.appname");

        stage
            .register(event, &CorrelationId::from("c1"), &CancellationToken::new())
            .await
            .unwrap();

        let saved = events.get("1").unwrap();
        assert_eq!(saved.resource(), Some("urn:altinn:resource:app_orgname_appname"));

        let forwarded = next.items();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, saved);
        assert_eq!(forwarded[0].1.as_str(), "c1");
    }

    #[tokio::test]
    async fn persistence_failure_does_not_forward() {
        let (stage, events, next) = registration();
        events.fail_next_saves(1);

        let err = stage
            .register(CloudEvent::new("1", "/s", "t"), &CorrelationId::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Storage(_)));
        assert!(next.items().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_persisting() {
        let (stage, events, _) = registration();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = stage
            .register(CloudEvent::new("1", "/s", "t"), &CorrelationId::new(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Cancelled));
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_codec_error() {
        let (stage, _, _) = registration();
        let err = stage
            .run("{not json", &CorrelationId::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Codec(_)));
    }
}
