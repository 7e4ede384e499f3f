//! RFC 3339 timestamps that re-serialize to exactly the text they were read from.
//!
//! Producers render the same instant in many valid ways (seven-digit fractions,
//! `+01:00` offsets). Wire attributes such as a cloud event's `time` or a retry
//! wrapper's `firstProcessedAt` must survive decode/encode byte-for-byte, so the
//! raw text is kept next to the parsed value.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timestamp {
    raw: String,
    value: DateTime<Utc>,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Render a datetime with microsecond precision.
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        let value = value.trunc_subsecs(6);
        Self {
            raw: value.to_rfc3339_opts(SecondsFormat::Micros, true),
            value,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, chrono::ParseError> {
        let value = DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc);
        Ok(Self {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The instant, normalized to UTC.
    pub fn value(&self) -> DateTime<Utc> {
        self.value
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}
