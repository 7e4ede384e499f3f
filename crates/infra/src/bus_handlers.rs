//! Message-bus command handlers.
//!
//! Each handler runs the same stage step as the queue deployment; only the
//! transport around it differs. Follow-up commands are published through a
//! [`crate::stages::BusForwarder`] and keep the incoming correlation id.
//!
//! Retry decisions belong to the [`RetryChain`] each handler is run under.
//! [`BusRetryPolicies::defaults`] holds the standard tables:
//!
//! | command | kinds | cooldown | scheduled |
//! |---|---|---|---|
//! | register-event, send-to-outbound | transient | 100ms, 500ms, 1s | 5s, 30s, 1m, 5m |
//! | send-to-subscriber | transient | 100ms, 500ms, 1s | 10s .. 12h (10 steps) |
//! | validate-subscription | network, timeout, remote status | 1s, 5s | 1m, 10m |

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_events::{
    BusMessage, Command, CommandHandler, FailureKind, RegisterEvent, RetryChain, RetryChainError,
    RetryTiers, SendToOutbound, SendToSubscriber, ValidateSubscription,
};

use crate::stages::{Inbound, Outbound, Registration, StageError, Validation};

pub struct RegisterEventHandler {
    registration: Registration,
}

impl RegisterEventHandler {
    pub fn new(registration: Registration) -> Self {
        Self { registration }
    }
}

#[async_trait]
impl CommandHandler for RegisterEventHandler {
    type Cmd = RegisterEvent;
    type Error = StageError;

    async fn handle(
        &self,
        message: &BusMessage<RegisterEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        self.registration
            .register(message.command().event.clone(), message.correlation_id(), cancel)
            .await
    }
}

pub struct SendToOutboundHandler {
    inbound: Inbound,
}

impl SendToOutboundHandler {
    pub fn new(inbound: Inbound) -> Self {
        Self { inbound }
    }
}

#[async_trait]
impl CommandHandler for SendToOutboundHandler {
    type Cmd = SendToOutbound;
    type Error = StageError;

    async fn handle(
        &self,
        message: &BusMessage<SendToOutbound>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        self.inbound
            .dispatch(message.command().event.clone(), message.correlation_id(), cancel)
            .await
            .map(|_| ())
    }
}

pub struct SendToSubscriberHandler {
    outbound: Outbound,
}

impl SendToSubscriberHandler {
    pub fn new(outbound: Outbound) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl CommandHandler for SendToSubscriberHandler {
    type Cmd = SendToSubscriber;
    type Error = StageError;

    async fn handle(
        &self,
        message: &BusMessage<SendToSubscriber>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        self.outbound.deliver(&message.command().envelope, cancel).await
    }
}

pub struct ValidateSubscriptionHandler {
    validation: Validation,
}

impl ValidateSubscriptionHandler {
    pub fn new(validation: Validation) -> Self {
        Self { validation }
    }
}

#[async_trait]
impl CommandHandler for ValidateSubscriptionHandler {
    type Cmd = ValidateSubscription;
    type Error = StageError;

    async fn handle(
        &self,
        message: &BusMessage<ValidateSubscription>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        self.validation
            .validate(&message.command().subscription, cancel)
            .await
    }
}

/// One retry chain per command. All four are required.
#[derive(Debug, Clone)]
pub struct BusRetryPolicies {
    pub register: RetryChain,
    pub send_to_outbound: RetryChain,
    pub send_to_subscriber: RetryChain,
    pub validate_subscription: RetryChain,
}

const TRANSIENT: [FailureKind; 6] = [
    FailureKind::Network,
    FailureKind::Timeout,
    FailureKind::RemoteStatus,
    FailureKind::Storage,
    FailureKind::Queue,
    FailureKind::Other,
];

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

impl BusRetryPolicies {
    pub fn new(
        register: RetryChain,
        send_to_outbound: RetryChain,
        send_to_subscriber: RetryChain,
        validate_subscription: RetryChain,
    ) -> Self {
        Self {
            register,
            send_to_outbound,
            send_to_subscriber,
            validate_subscription,
        }
    }

    pub fn defaults() -> Result<Self, RetryChainError> {
        let short = || {
            RetryTiers::new(
                vec![ms(100), ms(500), secs(1)],
                vec![secs(5), secs(30), secs(60), secs(5 * 60)],
            )
        };

        let register = RetryChain::builder(RegisterEvent::NAME)
            .on(TRANSIENT, short())
            .build()?;
        let send_to_outbound = RetryChain::builder(SendToOutbound::NAME)
            .on(TRANSIENT, short())
            .build()?;

        let send_to_subscriber = RetryChain::builder(SendToSubscriber::NAME)
            .on(
                TRANSIENT,
                RetryTiers::new(
                    vec![ms(100), ms(500), secs(1)],
                    [10, 30, 60, 5 * 60, 10 * 60, 30 * 60, 3600, 3 * 3600, 6 * 3600, 12 * 3600]
                        .into_iter()
                        .map(secs)
                        .collect(),
                ),
            )
            .build()?;

        let validate_subscription = RetryChain::builder(ValidateSubscription::NAME)
            .on(
                [FailureKind::Network, FailureKind::Timeout, FailureKind::RemoteStatus],
                RetryTiers::new(vec![secs(1), secs(5)], vec![secs(60), secs(10 * 60)]),
            )
            .build()?;

        Ok(Self::new(register, send_to_outbound, send_to_subscriber, validate_subscription))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use courier_core::{CloudEvent, CorrelationId, Subscription, SubscriptionId};
    use courier_events::{
        CloudEventEnvelope, CommandOutcome, CommandRunner, InMemoryMessageBus, RetryDecision,
    };

    use super::*;
    use crate::stages::BusForwarder;
    use crate::storage::{InMemoryEventRepository, InMemorySubscriptionRepository};
    use crate::webhook::{WebhookError, WebhookSender};

    struct RejectingWebhook;

    #[async_trait]
    impl WebhookSender for RejectingWebhook {
        async fn send(&self, envelope: &CloudEventEnvelope) -> Result<(), WebhookError> {
            Err(WebhookError::InvalidArgument(envelope.endpoint().to_string()))
        }
    }

    #[test]
    fn default_tables_build() {
        let policies = BusRetryPolicies::defaults().unwrap();

        assert_eq!(policies.register.command(), "register-event");
        assert_eq!(
            policies.send_to_subscriber.decide(FailureKind::Network, 3, 9),
            RetryDecision::Schedule(Duration::from_secs(12 * 3600))
        );
        assert_eq!(
            policies.send_to_subscriber.decide(FailureKind::Network, 3, 10),
            RetryDecision::DeadLetter
        );
        assert_eq!(
            policies.validate_subscription.decide(FailureKind::Storage, 0, 0),
            RetryDecision::DeadLetter
        );
        assert_eq!(
            policies.register.decide(FailureKind::Malformed, 0, 0),
            RetryDecision::DeadLetter
        );
    }

    #[tokio::test]
    async fn registered_event_is_forwarded_with_correlation() {
        let events = Arc::new(InMemoryEventRepository::new());
        let outbound_bus = Arc::new(InMemoryMessageBus::<SendToOutbound>::new());
        let registration = Registration::new(
            events.clone(),
            Arc::new(BusForwarder::<SendToOutbound>::new(outbound_bus.clone())),
        );

        let runner = CommandRunner::new(
            RegisterEventHandler::new(registration),
            Arc::new(InMemoryMessageBus::<RegisterEvent>::new()),
            BusRetryPolicies::defaults().unwrap().register,
        );

        let message = BusMessage::with_correlation_id(
            RegisterEvent {
                event: CloudEvent::new("1", "/ttd/app", "app.instance.created"),
            },
            CorrelationId::from("c1"),
        );
        let outcome = runner.run(message, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, CommandOutcome::Handled { attempts: 1 });
        assert_eq!(events.events().len(), 1);

        let published = outbound_bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].command().event.id(), "1");
        assert_eq!(published[0].correlation_id().as_str(), "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn storage_outage_cools_down_then_schedules() {
        let events = Arc::new(InMemoryEventRepository::new());
        events.fail_next_saves(4);
        let bus = Arc::new(InMemoryMessageBus::<RegisterEvent>::new());
        let registration = Registration::new(
            events.clone(),
            Arc::new(BusForwarder::<SendToOutbound>::new(Arc::new(
                InMemoryMessageBus::<SendToOutbound>::new(),
            ))),
        );
        let runner = CommandRunner::new(
            RegisterEventHandler::new(registration),
            bus.clone(),
            BusRetryPolicies::defaults().unwrap().register,
        );

        let outcome = runner
            .run(
                BusMessage::new(RegisterEvent {
                    event: CloudEvent::new("1", "/s", "t"),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Rescheduled { delay: Duration::from_secs(5) });
        let scheduled = bus.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0.scheduled_attempts(), 1);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn invalid_endpoint_is_dead_lettered_without_retry() {
        let bus = Arc::new(InMemoryMessageBus::<SendToSubscriber>::new());
        let runner = CommandRunner::new(
            SendToSubscriberHandler::new(Outbound::new(Arc::new(RejectingWebhook))),
            bus.clone(),
            BusRetryPolicies::defaults().unwrap().send_to_subscriber,
        );

        let envelope = CloudEventEnvelope::new(
            CloudEvent::new("1", "/s", "t"),
            "not a url",
            "/org/ttd",
            SubscriptionId::new(3),
        );
        let outcome = runner
            .run(BusMessage::new(SendToSubscriber { envelope }), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, CommandOutcome::DeadLettered { .. }));
        assert_eq!(bus.dead_lettered().len(), 1);
        assert!(bus.scheduled().is_empty());
    }

    #[tokio::test]
    async fn fan_out_publishes_one_subscriber_command_per_match() {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        for id in 1..=2 {
            subscriptions.insert(
                Subscription::new(
                    SubscriptionId::new(id),
                    format!("https://s{id}.example/hook"),
                    "/org/ttd",
                    "/org/ttd",
                )
                .validated(),
            );
        }
        let subscriber_bus = Arc::new(InMemoryMessageBus::<SendToSubscriber>::new());
        let handler = SendToOutboundHandler::new(Inbound::new(
            subscriptions,
            Arc::new(BusForwarder::<SendToSubscriber>::new(subscriber_bus.clone())),
        ));

        handler
            .handle(
                &BusMessage::new(SendToOutbound {
                    event: CloudEvent::new("1", "/s", "t"),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let published = subscriber_bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(SendToSubscriber::NAME, "send-to-subscriber");
        assert_eq!(published[1].command().envelope.subscription_id(), SubscriptionId::new(2));
    }
}
