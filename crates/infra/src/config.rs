//! Configuration loading and representation.
//!
//! Settings come from environment variables and are validated eagerly: a
//! missing or malformed value is a [`ConfigError`] at startup, never a
//! per-message failure.
//!
//! | variable | default |
//! |---|---|
//! | `COURIER_API_BASE_URL` | required |
//! | `COURIER_QUEUE_BACKEND` | `memory` (`memory` \| `redis`) |
//! | `COURIER_REDIS_URL` | required when backend is `redis` |
//! | `COURIER_STORAGE` | `memory` (`memory` \| `postgres`) |
//! | `DATABASE_URL` | required when storage is `postgres` |
//! | `COURIER_REGISTRATION_QUEUE` | `events-registration` |
//! | `COURIER_INBOUND_QUEUE` | `events-inbound` |
//! | `COURIER_OUTBOUND_QUEUE` | `events-outbound` |
//! | `COURIER_VALIDATION_QUEUE` | `subscription-validation` |
//! | `COURIER_WEBHOOK_TIMEOUT_SECS` | `30` |
//! | `COURIER_POLL_INTERVAL_MS` | `500` |
//! | `COURIER_MAX_NATIVE_DEQUEUE_COUNT` | `12` |

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value `{value}` for `{name}`: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres { database_url: String },
}

/// Main queue names, one per stage. Poison queues derive from these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub registration: String,
    pub inbound: String,
    pub outbound: String,
    pub validation: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            registration: "events-registration".to_string(),
            inbound: "events-inbound".to_string(),
            outbound: "events-outbound".to_string(),
            validation: "subscription-validation".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Source of synthetic validation events.
    pub api_base_url: String,
    pub queue_backend: QueueBackend,
    pub storage: StorageBackend,
    pub queues: QueueNames,
    pub webhook_timeout: Duration,
    pub poll_interval: Duration,
    /// Substrate-level redelivery ceiling used by the queue consumer.
    pub max_native_dequeue_count: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let api_base_url = required("COURIER_API_BASE_URL")?;
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                name: "COURIER_API_BASE_URL",
                value: api_base_url,
                reason: "expected an http(s) URL".to_string(),
            });
        }

        let queue_backend = match get("COURIER_QUEUE_BACKEND").as_deref() {
            None | Some("memory") => QueueBackend::Memory,
            Some("redis") => QueueBackend::Redis {
                url: required("COURIER_REDIS_URL")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "COURIER_QUEUE_BACKEND",
                    value: other.to_string(),
                    reason: "expected `memory` or `redis`".to_string(),
                });
            }
        };

        let storage = match get("COURIER_STORAGE").as_deref() {
            None | Some("memory") => StorageBackend::Memory,
            Some("postgres") => StorageBackend::Postgres {
                database_url: required("DATABASE_URL")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "COURIER_STORAGE",
                    value: other.to_string(),
                    reason: "expected `memory` or `postgres`".to_string(),
                });
            }
        };

        let defaults = QueueNames::default();
        let queues = QueueNames {
            registration: get("COURIER_REGISTRATION_QUEUE").unwrap_or(defaults.registration),
            inbound: get("COURIER_INBOUND_QUEUE").unwrap_or(defaults.inbound),
            outbound: get("COURIER_OUTBOUND_QUEUE").unwrap_or(defaults.outbound),
            validation: get("COURIER_VALIDATION_QUEUE").unwrap_or(defaults.validation),
        };

        let webhook_timeout = Duration::from_secs(parse_or(&get, "COURIER_WEBHOOK_TIMEOUT_SECS", 30)?);
        let poll_interval = Duration::from_millis(parse_or(&get, "COURIER_POLL_INTERVAL_MS", 500)?);
        let max_native_dequeue_count: u32 = parse_or(&get, "COURIER_MAX_NATIVE_DEQUEUE_COUNT", 12)?;

        if max_native_dequeue_count == 0 {
            return Err(ConfigError::Invalid {
                name: "COURIER_MAX_NATIVE_DEQUEUE_COUNT",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            api_base_url,
            queue_backend,
            storage,
            queues,
            webhook_timeout,
            poll_interval,
            max_native_dequeue_count,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
