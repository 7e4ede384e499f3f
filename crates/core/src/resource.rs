//! Legacy resource identifier normalization.
//!
//! App events were historically published with a dotted resource
//! (`urn:altinn:resource:altinnapp.{org}.{app}`). Subscriptions are matched on the
//! canonical underscore form (`urn:altinn:resource:app_{org}_{app}`), so the
//! registration stage rewrites legacy identifiers before persisting.

use crate::cloud_event::CloudEvent;

/// Prefix marking a dotted legacy app resource.
pub const LEGACY_APP_RESOURCE_PREFIX: &str = "urn:altinn:resource:altinnapp.";

const CANONICAL_APP_RESOURCE_PREFIX: &str = "urn:altinn:resource:app_";

/// Rewrite a legacy dotted resource into its canonical form.
///
/// Org and app are read from the first two path segments of the event source.
/// When the source does not carry them, the dotted remainder of the resource is
/// used instead. Events without a legacy resource are returned unchanged.
pub fn normalize_resource(event: CloudEvent) -> CloudEvent {
    let Some(legacy) = event
        .resource()
        .and_then(|r| r.strip_prefix(LEGACY_APP_RESOURCE_PREFIX))
    else {
        return event;
    };

    let (org, app) = match org_and_app_from_source(event.source()) {
        Some(pair) => pair,
        None => match legacy.split_once('.') {
            Some((org, app)) if !org.is_empty() && !app.is_empty() => {
                (org.to_string(), app.to_string())
            }
            _ => return event,
        },
    };

    let canonical = format!("{CANONICAL_APP_RESOURCE_PREFIX}{org}_{app}");
    event.with_resource(canonical)
}

fn org_and_app_from_source(source: &str) -> Option<(String, String)> {
    // Absolute URIs carry the path after the authority; relative sources are
    // already a path.
    let path = match source.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|idx| &rest[idx..])?,
        None => source,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let org = segments.next()?;
    let app = segments.next()?;
    Some((org.to_string(), app.to_string()))
}
