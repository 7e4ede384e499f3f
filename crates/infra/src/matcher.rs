//! Subscription matching.
//!
//! A subscription matches an event when it is validated and every populated
//! filter agrees with the event:
//!
//! | filter | event attribute | rule |
//! |---|---|---|
//! | `resource_filter` | `resource` | equal |
//! | `source_filter` | `source` | equal, or prefix when the filter ends in `*` |
//! | `subject_filter` | `subject` | equal |
//! | `type_filter` | `type` | equal |

use courier_core::{CloudEvent, Subscription};

pub fn matches(subscription: &Subscription, event: &CloudEvent) -> bool {
    subscription.validated
        && optional_equals(subscription.resource_filter.as_deref(), event.resource())
        && source_matches(subscription.source_filter.as_deref(), event.source())
        && optional_equals(subscription.subject_filter.as_deref(), event.subject())
        && filter_equals(subscription.type_filter.as_deref(), event.event_type())
}

/// Keep the subscriptions in `candidates` that match `event`.
pub fn matching(candidates: Vec<Subscription>, event: &CloudEvent) -> Vec<Subscription> {
    candidates
        .into_iter()
        .filter(|s| matches(s, event))
        .collect()
}

fn filter_equals(filter: Option<&str>, value: &str) -> bool {
    filter.is_none_or(|f| f == value)
}

fn optional_equals(filter: Option<&str>, value: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => value == Some(f),
    }
}

fn source_matches(filter: Option<&str>, source: &str) -> bool {
    match filter {
        None => true,
        Some(f) => match f.strip_suffix('*') {
            Some(prefix) => source.starts_with(prefix),
            None => f == source,
        },
    }
}

#[cfg(test)]
mod tests {
    use courier_core::SubscriptionId;

    use super::*;

    fn event() -> CloudEvent {
        CloudEvent::new("1", "https://platform.example/ttd/app/instances/1", "app.instance.created")
            .with_subject("/party/50001")
            .with_resource("urn:altinn:resource:app_ttd_app")
    }

    fn subscription() -> Subscription {
        Subscription::new(SubscriptionId::new(1), "https://hook.example", "/org/ttd", "/org/ttd").validated()
    }

    #[test]
    fn unfiltered_validated_subscription_matches_everything() {
        assert!(matches(&subscription(), &event()));
    }

    #[test]
    fn unvalidated_subscriptions_never_match() {
        let mut sub = subscription();
        sub.validated = false;
        assert!(!matches(&sub, &event()));
    }

    #[test]
    fn every_populated_filter_must_agree() {
        let sub = subscription()
            .with_resource_filter("urn:altinn:resource:app_ttd_app")
            .with_subject_filter("/party/50001")
            .with_type_filter("app.instance.created");
        assert!(matches(&sub, &event()));

        let sub = subscription().with_type_filter("app.instance.deleted");
        assert!(!matches(&sub, &event()));

        let sub = subscription().with_subject_filter("/party/1");
        assert!(!matches(&sub, &event()));
    }

    #[test]
    fn subject_filter_requires_event_subject() {
        let sub = subscription().with_subject_filter("/party/50001");
        let event = CloudEvent::new("1", "/s", "t");
        assert!(!matches(&sub, &event));
    }

    #[test]
    fn source_filter_supports_trailing_wildcard() {
        let sub = subscription().with_source_filter("https://platform.example/ttd/*");
        assert!(matches(&sub, &event()));

        let sub = subscription().with_source_filter("https://platform.example/other/*");
        assert!(!matches(&sub, &event()));

        let sub = subscription().with_source_filter("https://platform.example/ttd/app");
        assert!(!matches(&sub, &event()));
    }

    #[test]
    fn matching_keeps_only_matches() {
        let keep = subscription();
        let mut drop = subscription();
        drop.id = SubscriptionId::new(2);
        drop.type_filter = Some("other".to_string());

        let result = matching(vec![keep.clone(), drop], &event());
        assert_eq!(result, vec![keep]);
    }
}
