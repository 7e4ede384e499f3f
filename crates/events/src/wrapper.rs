//! Retry wrapper carried across queue hops.
//!
//! Wire shape (camelCase, bit-exact):
//!
//! ```text
//! {"payload":"<string>","dequeueCount":<int>,"firstProcessedAt":"<ISO-8601>","correlationId":"<string>"}
//! ```
//!
//! `payload` is itself serialized JSON: a bare cloud event or a
//! [`crate::CloudEventEnvelope`], decided by the stage.
//!
//! Older producers put the bare payload on the queue with no wrapper at all.
//! [`QueueMessage::decode`] models that fork as a tagged result instead of an
//! error path: a raw body that is not a well-formed wrapper is `Bare`.

use serde::{Deserialize, Serialize};

use courier_core::{CodecError, CodecResult, CorrelationId, Timestamp};

/// Retry state that travels with a message across requeues.
///
/// Requeue operations are value-producing: [`RetryableEventWrapper::requeued`]
/// returns a new wrapper and leaves `first_processed_at` and `correlation_id`
/// untouched.
///
/// `dequeue_count` is the application-level attempt counter. It is independent
/// of the queue substrate's own per-message dequeue count and the two are not
/// expected to agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryableEventWrapper {
    payload: String,
    dequeue_count: u32,
    first_processed_at: Timestamp,
    correlation_id: CorrelationId,
}

impl RetryableEventWrapper {
    /// First sighting of a payload under a known correlation id.
    pub fn new(payload: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            payload: payload.into(),
            dequeue_count: 0,
            first_processed_at: Timestamp::now(),
            correlation_id,
        }
    }

    /// First sighting of a payload with a brand new correlation id.
    pub fn fresh(payload: impl Into<String>) -> Self {
        Self::new(payload, CorrelationId::new())
    }

    pub fn from_parts(
        payload: impl Into<String>,
        dequeue_count: u32,
        first_processed_at: Timestamp,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            payload: payload.into(),
            dequeue_count,
            first_processed_at,
            correlation_id,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn dequeue_count(&self) -> u32 {
        self.dequeue_count
    }

    pub fn first_processed_at(&self) -> &Timestamp {
        &self.first_processed_at
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Same message, one more recorded attempt.
    pub fn requeued(&self) -> Self {
        Self {
            dequeue_count: self.dequeue_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Wrapper for the next pipeline stage: new payload and attempt history,
    /// same correlation id.
    pub fn forwarded(&self, payload: impl Into<String>) -> Self {
        Self::new(payload, self.correlation_id.clone())
    }

    /// Strict decode. Anything that is not exactly a wrapper yields `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn to_json(&self) -> CodecResult<String> {
        serde_json::to_string(self).map_err(CodecError::from)
    }
}

/// Result of reading a raw queue body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// Current format: retry state travels with the payload.
    Wrapped(RetryableEventWrapper),
    /// Legacy format: the body is the stage payload itself.
    Bare(String),
}

impl QueueMessage {
    pub fn decode(raw: &str) -> Self {
        match RetryableEventWrapper::decode(raw) {
            Some(wrapper) => Self::Wrapped(wrapper),
            None => Self::Bare(raw.to_string()),
        }
    }

    /// The serialized stage payload regardless of format.
    pub fn payload(&self) -> &str {
        match self {
            Self::Wrapped(wrapper) => wrapper.payload(),
            Self::Bare(raw) => raw,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Bare(_))
    }

    /// Retry state for this message; legacy bodies get a synthesized wrapper
    /// with `dequeue_count = 0`, a new correlation id and `now` as first sighting.
    pub fn into_wrapper(self) -> RetryableEventWrapper {
        match self {
            Self::Wrapped(wrapper) => wrapper,
            Self::Bare(raw) => RetryableEventWrapper::fresh(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{SubsecRound, Utc};

    use super::*;

    fn wrapper(payload: &str, dequeue_count: u32) -> RetryableEventWrapper {
        RetryableEventWrapper::from_parts(
            payload,
            dequeue_count,
            Timestamp::parse("2024-05-02T10:11:12.1234567+00:00").unwrap(),
            CorrelationId::from("c1"),
        )
    }

    #[test]
    fn wire_shape_is_camel_case_in_field_order() {
        let json = wrapper("{}", 2).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"payload":"{}","dequeueCount":2,"firstProcessedAt":"2024-05-02T10:11:12.1234567+00:00","correlationId":"c1"}"#
        );
    }

    #[test]
    fn round_trips_unicode_and_empty_payloads() {
        for payload in ["", "æøå ✓ 日本語", r#"{"id":"1","emoji":"🚀"}"#] {
            let original = wrapper(payload, 3);
            let decoded = RetryableEventWrapper::decode(&original.to_json().unwrap()).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn requeue_increments_and_preserves_identity() {
        let original = wrapper("p", 4);
        let next = original.requeued();

        assert_eq!(next.dequeue_count(), 5);
        assert_eq!(original.dequeue_count(), 4);
        assert_eq!(next.correlation_id(), original.correlation_id());
        assert_eq!(next.first_processed_at().as_str(), "2024-05-02T10:11:12.1234567+00:00");

        let encoded = next.to_json().unwrap();
        assert!(encoded.contains(r#""firstProcessedAt":"2024-05-02T10:11:12.1234567+00:00""#));
    }

    #[test]
    fn forwarded_keeps_correlation_and_resets_attempts() {
        let original = wrapper("p", 7);
        let next = original.forwarded("q");

        assert_eq!(next.payload(), "q");
        assert_eq!(next.dequeue_count(), 0);
        assert_eq!(next.correlation_id(), original.correlation_id());
    }

    #[test]
    fn bare_cloud_event_is_not_a_wrapper() {
        let raw = r#"{"specversion":"1.0","id":"1","source":"/s","type":"t"}"#;
        let message = QueueMessage::decode(raw);

        assert!(message.is_legacy());
        assert_eq!(message.payload(), raw);
    }

    #[test]
    fn shape_mismatches_fall_back_to_bare() {
        for raw in [
            "not json",
            r#"{"payload":"x","dequeueCount":-1,"firstProcessedAt":"2024-01-01T00:00:00Z","correlationId":"c"}"#,
            r#"{"payload":"x","dequeueCount":1,"firstProcessedAt":"yesterday","correlationId":"c"}"#,
            r#"{"payload":"x","dequeueCount":1,"firstProcessedAt":"2024-01-01T00:00:00Z"}"#,
            r#"{"payload":"x","dequeueCount":1,"firstProcessedAt":"2024-01-01T00:00:00Z","correlationId":"c","extra":1}"#,
        ] {
            assert!(QueueMessage::decode(raw).is_legacy(), "expected bare: {raw}");
        }
    }

    #[test]
    fn legacy_messages_get_a_fresh_wrapper() {
        let before = Utc::now().trunc_subsecs(6);
        let wrapper = QueueMessage::decode("legacy body").into_wrapper();

        assert_eq!(wrapper.payload(), "legacy body");
        assert_eq!(wrapper.dequeue_count(), 0);
        assert!(!wrapper.correlation_id().as_str().is_empty());
        assert!(wrapper.first_processed_at().value() >= before);
    }

    #[test]
    fn wrapped_messages_keep_their_wrapper() {
        let original = wrapper("p", 1);
        let message = QueueMessage::decode(&original.to_json().unwrap());

        assert!(!message.is_legacy());
        assert_eq!(message.into_wrapper(), original);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_inverts_encode(
                payload in "\\PC{0,64}",
                dequeue_count in 0u32..1000,
                correlation in "[a-zA-Z0-9-]{1,40}",
            ) {
                let original = RetryableEventWrapper::from_parts(
                    payload,
                    dequeue_count,
                    Timestamp::now(),
                    CorrelationId::from(correlation),
                );
                let decoded = RetryableEventWrapper::decode(&original.to_json().unwrap());
                prop_assert_eq!(decoded, Some(original));
            }

            #[test]
            fn repeated_requeues_preserve_identity(times in 1usize..30) {
                let original = RetryableEventWrapper::fresh("payload");
                let mut current = original.clone();
                for _ in 0..times {
                    current = RetryableEventWrapper::decode(&current.requeued().to_json().unwrap()).unwrap();
                }
                prop_assert_eq!(current.dequeue_count() as usize, times);
                prop_assert_eq!(current.correlation_id(), original.correlation_id());
                prop_assert_eq!(current.first_processed_at().as_str(), original.first_processed_at().as_str());
            }
        }
    }
}
