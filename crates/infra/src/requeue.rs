//! Retry/requeue engine for the queue-trigger deployment.
//!
//! Given the wrapper of a message whose stage failed and the failure itself,
//! [`RequeueEngine::requeue_with_backoff`] performs **exactly one** send:
//!
//! 1. Permanent failure: the wrapper goes to the poison queue unchanged.
//! 2. Transient failure: `dequeueCount + 1`. Above [`MAX_DEQUEUE_COUNT`] the
//!    incremented wrapper goes to poison, otherwise it goes back to the main
//!    queue, invisible for [`visibility_delay`] of the new count.
//!
//! Poison sends are immediately visible. Both queues get [`MESSAGE_TTL`].
//! If the send fails the [`QueueError`] propagates and the substrate's own
//! redelivery takes over.

use std::sync::Arc;
use std::time::Duration;

use courier_events::{
    Classification, Classify, MAX_DEQUEUE_COUNT, MESSAGE_TTL, QueueError, QueueSink,
    RetryableEventWrapper, visibility_delay,
};

/// Why a message was quarantined.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuarantineReason {
    Permanent,
    CeilingExceeded,
}

impl QuarantineReason {
    pub fn as_str(self) -> &'static str {
        match self {
            QuarantineReason::Permanent => "permanent",
            QuarantineReason::CeilingExceeded => "ceiling_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    Requeued { dequeue_count: u32, delay: Duration },
    Quarantined { dequeue_count: u32, reason: QuarantineReason },
}

/// Requeue engine bound to one stage's main and poison queues.
#[derive(Clone)]
pub struct RequeueEngine {
    main: Arc<dyn QueueSink>,
    poison: Arc<dyn QueueSink>,
}

impl RequeueEngine {
    pub fn new(main: Arc<dyn QueueSink>, poison: Arc<dyn QueueSink>) -> Self {
        Self { main, poison }
    }

    pub fn main_queue(&self) -> &str {
        self.main.name()
    }

    pub fn poison_queue(&self) -> &str {
        self.poison.name()
    }

    pub async fn requeue_with_backoff<E>(
        &self,
        wrapper: &RetryableEventWrapper,
        error: &E,
    ) -> Result<RequeueOutcome, QueueError>
    where
        E: Classify + core::fmt::Display + ?Sized,
    {
        let kind = error.failure_kind();

        if error.classification() == Classification::Permanent {
            self.quarantine(wrapper, QuarantineReason::Permanent, &kind, error)
                .await?;
            return Ok(RequeueOutcome::Quarantined {
                dequeue_count: wrapper.dequeue_count(),
                reason: QuarantineReason::Permanent,
            });
        }

        let next = wrapper.requeued();
        if next.dequeue_count() > MAX_DEQUEUE_COUNT {
            self.quarantine(&next, QuarantineReason::CeilingExceeded, &kind, error)
                .await?;
            return Ok(RequeueOutcome::Quarantined {
                dequeue_count: next.dequeue_count(),
                reason: QuarantineReason::CeilingExceeded,
            });
        }

        let delay = visibility_delay(next.dequeue_count());
        let body = next.to_json().map_err(|e| QueueError::Send {
            queue: self.main.name().to_string(),
            message: e.to_string(),
        })?;

        self.main.send(body, Some(delay), Some(MESSAGE_TTL)).await?;

        tracing::warn!(
            queue = self.main.name(),
            correlation_id = %next.correlation_id(),
            dequeue_count = next.dequeue_count(),
            delay_secs = delay.as_secs(),
            kind = %kind,
            error = %error,
            "stage failed, message requeued"
        );

        Ok(RequeueOutcome::Requeued {
            dequeue_count: next.dequeue_count(),
            delay,
        })
    }

    /// Send `wrapper` unchanged to the poison queue, immediately visible.
    pub async fn send_to_poison(&self, wrapper: &RetryableEventWrapper) -> Result<(), QueueError> {
        let body = wrapper.to_json().map_err(|e| QueueError::Send {
            queue: self.poison.name().to_string(),
            message: e.to_string(),
        })?;
        self.poison
            .send(body, Some(Duration::ZERO), Some(MESSAGE_TTL))
            .await
    }

    async fn quarantine<E>(
        &self,
        wrapper: &RetryableEventWrapper,
        reason: QuarantineReason,
        kind: &courier_events::FailureKind,
        error: &E,
    ) -> Result<(), QueueError>
    where
        E: core::fmt::Display + ?Sized,
    {
        self.send_to_poison(wrapper).await?;

        tracing::error!(
            queue = self.poison.name(),
            correlation_id = %wrapper.correlation_id(),
            dequeue_count = wrapper.dequeue_count(),
            reason = reason.as_str(),
            kind = %kind,
            error = %error,
            "message quarantined"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_core::CorrelationId;
    use courier_events::{FailureKind, InMemoryQueue, Timestamp};

    use super::*;

    #[derive(Debug)]
    struct Failure(FailureKind);

    impl core::fmt::Display for Failure {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "{} failure", self.0)
        }
    }

    impl Classify for Failure {
        fn failure_kind(&self) -> FailureKind {
            self.0
        }
    }

    const T0: &str = "2024-05-02T10:11:12.1234567Z";

    fn wrapper(dequeue_count: u32) -> RetryableEventWrapper {
        RetryableEventWrapper::from_parts(
            r#"{"id":"1"}"#,
            dequeue_count,
            Timestamp::parse(T0).unwrap(),
            CorrelationId::from("c1"),
        )
    }

    fn engine() -> (RequeueEngine, Arc<InMemoryQueue>, Arc<InMemoryQueue>) {
        let main = Arc::new(InMemoryQueue::new("events-outbound"));
        let poison = Arc::new(InMemoryQueue::new("events-outbound-poison"));
        (RequeueEngine::new(main.clone(), poison.clone()), main, poison)
    }

    #[tokio::test]
    async fn transient_failure_requeues_with_incremented_count() {
        let (engine, main, poison) = engine();

        let outcome = engine
            .requeue_with_backoff(&wrapper(0), &Failure(FailureKind::Network))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RequeueOutcome::Requeued {
                dequeue_count: 1,
                delay: Duration::from_secs(10)
            }
        );
        assert!(poison.sent().is_empty());

        let sent = main.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].visibility_timeout, Some(Duration::from_secs(10)));
        assert_eq!(sent[0].time_to_live, Some(MESSAGE_TTL));

        let decoded = RetryableEventWrapper::decode(&sent[0].body).unwrap();
        assert_eq!(decoded.dequeue_count(), 1);
        assert_eq!(decoded.correlation_id().as_str(), "c1");
        assert_eq!(decoded.first_processed_at().as_str(), T0);
        assert_eq!(decoded.payload(), r#"{"id":"1"}"#);
    }

    #[tokio::test]
    async fn permanent_failure_goes_to_poison_unchanged() {
        let (engine, main, poison) = engine();

        let outcome = engine
            .requeue_with_backoff(&wrapper(3), &Failure(FailureKind::Malformed))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RequeueOutcome::Quarantined {
                dequeue_count: 3,
                reason: QuarantineReason::Permanent
            }
        );
        assert!(main.sent().is_empty());

        let sent = poison.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].visibility_timeout, Some(Duration::ZERO));
        assert_eq!(sent[0].time_to_live, Some(MESSAGE_TTL));
        assert_eq!(sent[0].body, wrapper(3).to_json().unwrap());
    }

    #[tokio::test]
    async fn ceiling_exceeded_goes_to_poison_incremented() {
        let (engine, main, poison) = engine();

        let outcome = engine
            .requeue_with_backoff(&wrapper(MAX_DEQUEUE_COUNT), &Failure(FailureKind::Timeout))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RequeueOutcome::Quarantined {
                dequeue_count: 13,
                reason: QuarantineReason::CeilingExceeded
            }
        );
        assert!(main.sent().is_empty());

        let decoded = RetryableEventWrapper::decode(&poison.sent()[0].body).unwrap();
        assert_eq!(decoded.dequeue_count(), 13);
        assert_eq!(decoded.correlation_id().as_str(), "c1");
    }

    #[tokio::test]
    async fn last_allowed_retry_still_uses_main_queue() {
        let (engine, main, poison) = engine();

        engine
            .requeue_with_backoff(&wrapper(MAX_DEQUEUE_COUNT - 1), &Failure(FailureKind::Other))
            .await
            .unwrap();

        assert_eq!(main.sent()[0].visibility_timeout, Some(Duration::from_secs(12 * 3600)));
        assert!(poison.sent().is_empty());
    }

    #[tokio::test]
    async fn visibility_follows_schedule() {
        for (count, secs) in [(2u32, 60u64), (5, 30 * 60), (8, 6 * 3600)] {
            let (engine, main, _) = engine();
            engine
                .requeue_with_backoff(&wrapper(count), &Failure(FailureKind::RemoteStatus))
                .await
                .unwrap();
            assert_eq!(main.sent()[0].visibility_timeout, Some(Duration::from_secs(secs)));
        }
    }

    #[tokio::test]
    async fn send_failure_propagates_without_fallback() {
        let (engine, main, poison) = engine();
        main.fail_next_sends(1);

        let err = engine
            .requeue_with_backoff(&wrapper(0), &Failure(FailureKind::Network))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Send { .. }));
        assert!(main.sent().is_empty());
        assert!(poison.sent().is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const TRANSIENT: [FailureKind; 6] = [
            FailureKind::Network,
            FailureKind::Timeout,
            FailureKind::RemoteStatus,
            FailureKind::Storage,
            FailureKind::Queue,
            FailureKind::Other,
        ];

        proptest! {
            #[test]
            fn transient_failures_increment_once_and_keep_identity(
                dequeue_count in 0u32..=20,
                payload in "\\PC{0,64}",
                correlation in "[a-zA-Z0-9-]{1,40}",
                first_processed_at in prop_oneof![
                    Just("2024-05-02T10:11:12.1234567Z"),
                    Just("2023-03-14T10:26:53.1234567+01:00"),
                    Just("2024-01-01T00:00:00Z"),
                ],
                kind in proptest::sample::select(TRANSIENT.to_vec()),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                let original = RetryableEventWrapper::from_parts(
                    payload.clone(),
                    dequeue_count,
                    Timestamp::parse(first_processed_at).unwrap(),
                    CorrelationId::from(correlation.clone()),
                );
                let (engine, main, poison) = engine();

                let outcome = runtime
                    .block_on(engine.requeue_with_backoff(&original, &Failure(kind)))
                    .unwrap();

                let (main_sent, poison_sent) = (main.sent(), poison.sent());
                prop_assert_eq!(main_sent.len() + poison_sent.len(), 1);

                let next = dequeue_count + 1;
                let quarantined = next > MAX_DEQUEUE_COUNT;
                let sent = if quarantined { &poison_sent[0] } else { &main_sent[0] };
                let decoded = RetryableEventWrapper::decode(&sent.body).unwrap();

                prop_assert_eq!(decoded.dequeue_count(), next);
                prop_assert_eq!(decoded.payload(), payload.as_str());
                prop_assert_eq!(decoded.first_processed_at().as_str(), first_processed_at);
                prop_assert_eq!(decoded.correlation_id().as_str(), correlation.as_str());
                prop_assert_eq!(sent.time_to_live, Some(MESSAGE_TTL));

                if quarantined {
                    prop_assert_eq!(sent.visibility_timeout, Some(Duration::ZERO));
                    prop_assert_eq!(
                        outcome,
                        RequeueOutcome::Quarantined {
                            dequeue_count: next,
                            reason: QuarantineReason::CeilingExceeded,
                        }
                    );
                } else {
                    prop_assert_eq!(sent.visibility_timeout, Some(visibility_delay(next)));
                    prop_assert_eq!(
                        outcome,
                        RequeueOutcome::Requeued {
                            dequeue_count: next,
                            delay: visibility_delay(next),
                        }
                    );
                }
            }
        }
    }
}
