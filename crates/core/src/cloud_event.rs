//! CloudEvents v1.0 structured-mode model and JSON codec.
//!
//! A [`CloudEvent`] is **immutable** once decoded. The only sanctioned rewrite is
//! the legacy resource normalization in [`crate::resource`], which produces a new
//! value via [`CloudEvent::with_resource`].
//!
//! ## Wire format
//!
//! Required keys: `specversion` (must be `"1.0"`), `id`, `source`, `type`.
//! Optional keys: `subject`, `time`, `datacontenttype`, `dataschema`, and one of
//! `data` (JSON) or `data_base64` (binary). `resource` is the extension attribute
//! used for subscription matching. Every other top-level key is an extension
//! attribute and is preserved, in insertion order, through decode/encode.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CodecError, CodecResult};
use crate::timestamp::Timestamp;

/// The only CloudEvents version this codec accepts.
pub const SPEC_VERSION: &str = "1.0";

/// Event payload: JSON (`data`) or opaque bytes (`data_base64`).
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Json(JsonValue),
    Binary(Vec<u8>),
}

/// A received cloud event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireCloudEvent", into = "WireCloudEvent")]
pub struct CloudEvent {
    id: String,
    source: String,
    event_type: String,
    subject: Option<String>,
    time: Option<Timestamp>,
    data_content_type: Option<String>,
    data_schema: Option<String>,
    data: Option<EventData>,
    resource: Option<String>,
    extensions: Map<String, JsonValue>,
}

impl CloudEvent {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            event_type: event_type.into(),
            subject: None,
            time: None,
            data_content_type: None,
            data_schema: None,
            data: None,
            resource: None,
            extensions: Map::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_time(mut self, time: Timestamp) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_data_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.data_content_type = Some(content_type.into());
        self
    }

    pub fn with_data_schema(mut self, schema: impl Into<String>) -> Self {
        self.data_schema = Some(schema.into());
        self
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }

    /// Replace the `resource` attribute, producing a new event.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Add an extension attribute. Names must be lowercase alphanumeric and
    /// values must be a string, number or bool.
    pub fn with_extension(mut self, name: impl Into<String>, value: JsonValue) -> CodecResult<Self> {
        let name = name.into();
        validate_extension(&name, &value)?;
        if is_reserved(&name) {
            return Err(CodecError::invalid_extension(name, "reserved attribute name"));
        }
        self.extensions.insert(name, value);
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn spec_version(&self) -> &'static str {
        SPEC_VERSION
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// `time` exactly as it was received or set.
    pub fn time(&self) -> Option<&Timestamp> {
        self.time.as_ref()
    }

    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    pub fn data_schema(&self) -> Option<&str> {
        self.data_schema.as_deref()
    }

    pub fn data(&self) -> Option<&EventData> {
        self.data.as_ref()
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn extension(&self, name: &str) -> Option<&JsonValue> {
        self.extensions.get(name)
    }

    /// Extension attributes in insertion order.
    pub fn extensions(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.extensions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Decode a structured-mode JSON document.
    pub fn from_json(raw: &str) -> CodecResult<Self> {
        let wire: WireCloudEvent = serde_json::from_str(raw)?;
        Self::try_from(wire)
    }

    /// Decode from an already-parsed JSON value.
    pub fn from_value(value: JsonValue) -> CodecResult<Self> {
        let wire: WireCloudEvent = serde_json::from_value(value)?;
        Self::try_from(wire)
    }

    pub fn to_json(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> CodecResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Structured-mode JSON shape. Required keys are optional here so that a
/// missing attribute surfaces as [`CodecError::MissingAttribute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireCloudEvent {
    #[serde(default)]
    specversion: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dataschema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_base64: Option<String>,
    #[serde(flatten)]
    extensions: Map<String, JsonValue>,
}

impl TryFrom<WireCloudEvent> for CloudEvent {
    type Error = CodecError;

    fn try_from(wire: WireCloudEvent) -> CodecResult<Self> {
        let specversion = wire
            .specversion
            .ok_or(CodecError::MissingAttribute("specversion"))?;
        if specversion != SPEC_VERSION {
            return Err(CodecError::UnsupportedSpecVersion(specversion));
        }

        let id = required(wire.id, "id")?;
        let source = required(wire.source, "source")?;
        let event_type = required(wire.event_type, "type")?;

        let data = match (wire.data, wire.data_base64) {
            (Some(_), Some(_)) => return Err(CodecError::ConflictingData),
            (Some(json), None) => Some(EventData::Json(json)),
            (None, Some(encoded)) => Some(EventData::Binary(
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| CodecError::InvalidBase64(e.to_string()))?,
            )),
            (None, None) => None,
        };

        for (name, value) in &wire.extensions {
            validate_extension(name, value)?;
        }

        Ok(Self {
            id,
            source,
            event_type,
            subject: wire.subject,
            time: wire.time,
            data_content_type: wire.datacontenttype,
            data_schema: wire.dataschema,
            data,
            resource: wire.resource,
            extensions: wire.extensions,
        })
    }
}

impl From<CloudEvent> for WireCloudEvent {
    fn from(event: CloudEvent) -> Self {
        let (data, data_base64) = match event.data {
            Some(EventData::Json(json)) => (Some(json), None),
            Some(EventData::Binary(bytes)) => (None, Some(STANDARD.encode(bytes))),
            None => (None, None),
        };

        Self {
            specversion: Some(SPEC_VERSION.to_string()),
            id: Some(event.id),
            source: Some(event.source),
            event_type: Some(event.event_type),
            subject: event.subject,
            time: event.time,
            datacontenttype: event.data_content_type,
            dataschema: event.data_schema,
            resource: event.resource,
            data,
            data_base64,
            extensions: event.extensions,
        }
    }
}

fn required(value: Option<String>, name: &'static str) -> CodecResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CodecError::MissingAttribute(name)),
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "specversion"
            | "id"
            | "source"
            | "type"
            | "subject"
            | "time"
            | "datacontenttype"
            | "dataschema"
            | "resource"
            | "data"
    )
}

fn validate_extension(name: &str, value: &JsonValue) -> CodecResult<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(CodecError::invalid_extension(
            name,
            "names must be lowercase alphanumeric",
        ));
    }

    match value {
        JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => Ok(()),
        other => Err(CodecError::invalid_extension(
            name,
            format!("unsupported value `{other}`"),
        )),
    }
}
