//! Codec error model.

use thiserror::Error;

/// Result type used by the cloud event codec.
pub type CodecResult<T> = Result<T, CodecError>;

/// Failure to decode or encode a cloud event.
///
/// Every variant describes a payload that can never succeed on retry: the bytes
/// are wrong, not the environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input was not valid JSON, or did not have the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A required attribute was absent or empty.
    #[error("missing required attribute `{0}`")]
    MissingAttribute(&'static str),

    /// Only CloudEvents 1.0 is supported.
    #[error("unsupported specversion `{0}`")]
    UnsupportedSpecVersion(String),

    /// An extension attribute had an invalid name or a non-scalar value.
    #[error("invalid extension attribute `{name}`: {reason}")]
    InvalidExtension { name: String, reason: String },

    /// Both `data` and `data_base64` were populated.
    #[error("`data` and `data_base64` are mutually exclusive")]
    ConflictingData,

    /// `data_base64` was not valid base64.
    #[error("invalid data_base64: {0}")]
    InvalidBase64(String),
}

impl CodecError {
    pub fn malformed(msg: impl core::fmt::Display) -> Self {
        Self::Malformed(msg.to_string())
    }

    pub fn invalid_extension(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExtension {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}
