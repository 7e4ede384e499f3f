//! Backoff schedule and failure classification.
//!
//! Everything here is pure: no IO, no clocks.
//!
//! ## Schedule
//!
//! | dequeue count | visibility delay |
//! |---------------|------------------|
//! | 0 or 1        | 10 seconds       |
//! | 2             | 30 seconds       |
//! | 3             | 1 minute         |
//! | 4             | 5 minutes        |
//! | 5             | 10 minutes       |
//! | 6             | 30 minutes       |
//! | 7             | 1 hour           |
//! | 8             | 3 hours          |
//! | 9             | 6 hours          |
//! | 10 and above  | 12 hours         |
//!
//! The same table drives both the application-level requeue engine and the
//! coarser substrate-level redelivery in the queue consumer.
//!
//! ## Classification
//!
//! This module is the single place that decides whether a failure is worth
//! retrying. Call sites report a [`FailureKind`]; they never decide permanence
//! themselves.

use std::time::Duration;

/// Ceiling on application-level retries. A wrapper whose next dequeue count
/// would exceed this is quarantined.
pub const MAX_DEQUEUE_COUNT: u32 = 12;

/// Time-to-live applied to every message sent to a main or poison queue.
pub const MESSAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Visibility delay before a message with `dequeue_count` recorded attempts
/// becomes eligible for redelivery.
///
/// Monotonically non-decreasing; `0` is treated like `1`.
pub fn visibility_delay(dequeue_count: u32) -> Duration {
    let secs = match dequeue_count {
        0 | 1 => 10,
        2 => 30,
        3 => MINUTE,
        4 => 5 * MINUTE,
        5 => 10 * MINUTE,
        6 => 30 * MINUTE,
        7 => HOUR,
        8 => 3 * HOUR,
        9 => 6 * HOUR,
        _ => 12 * HOUR,
    };
    Duration::from_secs(secs)
}

/// Retry verdict for a failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Can never succeed on retry; quarantine immediately.
    Permanent,
    /// May succeed later; retry with backoff.
    Transient,
}

/// What went wrong, independent of which error type carried it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    /// Payload could not be deserialized.
    Malformed,
    /// Payload decoded but carried unusable arguments (e.g. an invalid URI).
    InvalidArgument,
    /// Connection refused/reset, DNS failure, TLS failure.
    Network,
    Timeout,
    /// The remote endpoint answered with a non-success status.
    RemoteStatus,
    Storage,
    Queue,
    /// Host shutdown or function timeout; not a delivery failure.
    Cancelled,
    Other,
}

impl FailureKind {
    /// Central retry policy. Unknown kinds are transient: a failure is never
    /// dropped silently because nobody classified it.
    pub fn classification(self) -> Classification {
        match self {
            FailureKind::Malformed | FailureKind::InvalidArgument => Classification::Permanent,
            FailureKind::Network
            | FailureKind::Timeout
            | FailureKind::RemoteStatus
            | FailureKind::Storage
            | FailureKind::Queue
            | FailureKind::Cancelled
            | FailureKind::Other => Classification::Transient,
        }
    }

    pub fn is_permanent(self) -> bool {
        self.classification() == Classification::Permanent
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Malformed => "malformed",
            FailureKind::InvalidArgument => "invalid_argument",
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::RemoteStatus => "remote_status",
            FailureKind::Storage => "storage",
            FailureKind::Queue => "queue",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "other",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can be classified for retry decisions.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;

    fn classification(&self) -> Classification {
        self.failure_kind().classification()
    }
}

impl Classify for courier_core::CodecError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Malformed
    }
}

impl Classify for crate::queue::QueueError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Queue
    }
}
