//! Outbound webhook delivery over HTTP.
//!
//! The sender POSTs an envelope's cloud event to the subscriber endpoint and
//! reports failures as a [`WebhookError`]. It never retries on its own; the
//! error's [`FailureKind`] decides what happens next.
//!
//! ## Request shape
//!
//! - Regular endpoints: structured-mode cloud event,
//!   `content-type: application/cloudevents+json`
//! - Slack incoming webhooks (`hooks.slack.com`): `{"text": "<event json>"}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use courier_core::CodecError;
use courier_events::{Classify, CloudEventEnvelope, FailureKind};

pub const CLOUD_EVENTS_CONTENT_TYPE: &str = "application/cloudevents+json";

const SLACK_HOST: &str = "hooks.slack.com";

/// Response bodies kept in errors are cut at this many bytes.
const MAX_ERROR_BODY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Network(String),

    #[error("webhook request timed out after {0:?}")]
    Timeout(Duration),

    #[error("webhook endpoint responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid webhook request: {0}")]
    InvalidArgument(String),

    #[error("failed to serialize cloud event: {0}")]
    Serialize(#[from] CodecError),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl Classify for WebhookError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            WebhookError::Network(_) => FailureKind::Network,
            WebhookError::Timeout(_) => FailureKind::Timeout,
            WebhookError::Status { .. } => FailureKind::RemoteStatus,
            WebhookError::InvalidArgument(_) => FailureKind::InvalidArgument,
            WebhookError::Serialize(_) => FailureKind::Malformed,
            WebhookError::Client(_) => FailureKind::Other,
        }
    }
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Deliver the envelope's event to its endpoint. `Ok` only on a 2xx answer.
    async fn send(&self, envelope: &CloudEventEnvelope) -> Result<(), WebhookError>;
}

#[async_trait]
impl<W> WebhookSender for std::sync::Arc<W>
where
    W: WebhookSender + ?Sized,
{
    async fn send(&self, envelope: &CloudEventEnvelope) -> Result<(), WebhookError> {
        (**self).send(envelope).await
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Pooled `reqwest` client; cheap to clone and share.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl HttpWebhookSender {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn classify_transport(&self, err: reqwest::Error) -> WebhookError {
        if err.is_timeout() {
            WebhookError::Timeout(self.config.timeout)
        } else if err.is_builder() {
            WebhookError::InvalidArgument(err.to_string())
        } else {
            WebhookError::Network(err.to_string())
        }
    }
}

/// Whether `url` is a Slack incoming webhook.
pub fn is_slack_endpoint(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(SLACK_HOST))
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            event_id = envelope.cloud_event().id(),
            subscription_id = %envelope.subscription_id(),
            endpoint = envelope.endpoint(),
        ),
        err(Display)
    )]
    async fn send(&self, envelope: &CloudEventEnvelope) -> Result<(), WebhookError> {
        let url = Url::parse(envelope.endpoint())
            .map_err(|e| WebhookError::InvalidArgument(format!("{}: {e}", envelope.endpoint())))?;

        let event_json = envelope.cloud_event().to_json()?;

        let request = if is_slack_endpoint(&url) {
            self.client
                .post(url)
                .json(&serde_json::json!({ "text": event_json }))
        } else {
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, CLOUD_EVENTS_CONTENT_TYPE)
                .body(event_json)
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "webhook delivered");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(WebhookError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{CloudEvent, SubscriptionId};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn envelope(endpoint: String) -> CloudEventEnvelope {
        let event = CloudEvent::new("42", "https://platform.example/ttd/app", "app.instance.created")
            .with_subject("/party/1");
        CloudEventEnvelope::new(event, endpoint, "/org/ttd", SubscriptionId::new(7))
    }

    fn sender(timeout: Duration) -> HttpWebhookSender {
        HttpWebhookSender::new(WebhookConfig {
            timeout,
            ..WebhookConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_structured_cloud_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", CLOUD_EVENTS_CONTENT_TYPE))
            .and(body_string_contains(r#""id":"42""#))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        sender(Duration::from_secs(5))
            .send(&envelope(format!("{}/hook", server.uri())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_remote_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = sender(Duration::from_secs(5))
            .send(&envelope(format!("{}/hook", server.uri())))
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::Status { status: 503, ref body } if body == "busy"));
        assert_eq!(err.failure_kind(), FailureKind::RemoteStatus);
        assert!(!err.failure_kind().is_permanent());
    }

    #[tokio::test]
    async fn client_errors_are_still_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = sender(Duration::from_secs(5))
            .send(&envelope(server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::RemoteStatus);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = sender(Duration::from_millis(100))
            .send(&envelope(server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::Timeout(_)));
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_failure() {
        let err = sender(Duration::from_secs(2))
            .send(&envelope("http://127.0.0.1:9/hook".to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Network);
    }

    #[tokio::test]
    async fn invalid_endpoint_is_permanent() {
        let err = sender(Duration::from_secs(2))
            .send(&envelope("not a url".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::InvalidArgument(_)));
        assert!(err.failure_kind().is_permanent());
    }

    #[test]
    fn slack_detection_uses_host() {
        assert!(is_slack_endpoint(&Url::parse("https://hooks.slack.com/services/T/B/X").unwrap()));
        assert!(!is_slack_endpoint(&Url::parse("https://example.org/hooks.slack.com").unwrap()));
    }
}
