use courier_core::{CloudEvent, Subscription};

use crate::CloudEventEnvelope;

/// A unit of work dispatched over the message bus.
///
/// Commands carry everything their handler needs, so they can be redelivered
/// or scheduled for later without any lookup.
///
/// `NAME` identifies the command in logs and in retry policy tables.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Normalize and persist a newly published event.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterEvent {
    pub event: CloudEvent,
}

impl Command for RegisterEvent {
    const NAME: &'static str = "register-event";
}

/// Fan a persisted event out to every matching subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SendToOutbound {
    pub event: CloudEvent,
}

impl Command for SendToOutbound {
    const NAME: &'static str = "send-to-outbound";
}

/// Push one envelope to its subscriber's webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct SendToSubscriber {
    pub envelope: CloudEventEnvelope,
}

impl Command for SendToSubscriber {
    const NAME: &'static str = "send-to-subscriber";
}

/// Check that a new subscription's endpoint accepts events.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateSubscription {
    pub subscription: Subscription,
}

impl Command for ValidateSubscription {
    const NAME: &'static str = "validate-subscription";
}
