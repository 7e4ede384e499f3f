//! `courier-core`: cloud event delivery building blocks.
//!
//! This crate contains **pure** types and codecs (no IO): the cloud event model,
//! the subscription entity, identifiers, and resource normalization.

pub mod cloud_event;
pub mod error;
pub mod id;
pub mod resource;
pub mod subscription;
pub mod timestamp;

pub use cloud_event::{CloudEvent, EventData, SPEC_VERSION};
pub use error::{CodecError, CodecResult};
pub use id::{CorrelationId, SubscriptionId};
pub use resource::{LEGACY_APP_RESOURCE_PREFIX, normalize_resource};
pub use subscription::Subscription;
pub use timestamp::Timestamp;
