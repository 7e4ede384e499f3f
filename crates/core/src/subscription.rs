//! Subscription entity (owned by the subscription API; referenced here).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::SubscriptionId;

/// A subscriber's registration for a filtered slice of the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Webhook URI receiving matching events.
    pub end_point: String,
    /// Identifier of the subscribing party.
    pub consumer: String,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<String>,
    #[serde(default)]
    pub validated: bool,
    pub created: DateTime<Utc>,
}

impl Subscription {
    /// New, not yet validated subscription.
    pub fn new(
        id: SubscriptionId,
        end_point: impl Into<String>,
        consumer: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id,
            end_point: end_point.into(),
            consumer: consumer.into(),
            created_by: created_by.into(),
            resource_filter: None,
            source_filter: None,
            subject_filter: None,
            type_filter: None,
            validated: false,
            created: Utc::now(),
        }
    }

    pub fn with_resource_filter(mut self, filter: impl Into<String>) -> Self {
        self.resource_filter = Some(filter.into());
        self
    }

    pub fn with_source_filter(mut self, filter: impl Into<String>) -> Self {
        self.source_filter = Some(filter.into());
        self
    }

    pub fn with_subject_filter(mut self, filter: impl Into<String>) -> Self {
        self.subject_filter = Some(filter.into());
        self
    }

    pub fn with_type_filter(mut self, filter: impl Into<String>) -> Self {
        self.type_filter = Some(filter.into());
        self
    }

    pub fn validated(mut self) -> Self {
        self.validated = true;
        self
    }
}
