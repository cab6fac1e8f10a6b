//! Envelope wire format: identity, source, and one typed payload.
//!
//! An envelope travels as a JSON object whose `data` field is the payload's
//! own JSON, base64-encoded. The `type` integer picks the payload variant
//! before the payload bytes are parsed; unrecognised tags fall back to
//! [`RawPayload`] so that newer peers can introduce message kinds without
//! breaking older ones.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Type tags
// ---------------------------------------------------------------------------

pub const TYPE_UNKNOWN: u32 = 0;
pub const TYPE_EVENT: u32 = 1;
pub const TYPE_REBOOT_ESTABLISH: u32 = 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Shape(#[source] serde_json::Error),
    #[error("invalid message id {id:?}: {source}")]
    Id {
        id: String,
        #[source]
        source: uuid::Error,
    },
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload does not match type {type_tag}: {source}")]
    Payload {
        type_tag: u32,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("type tag {0} is reserved for a typed payload")]
pub struct ReservedTagError(pub u32);

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Node lifecycle events.
///
/// Values outside the known set are kept as [`Event::Other`] and re-encoded
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Event {
    /// A node connected.
    Connect,
    /// A node disconnected cleanly.
    Disconnect,
    /// A node shut down cleanly.
    Shutdown,
    /// A node was lost (connection loss or crash).
    Loss,
    /// An update is available.
    Available,
    Other(UnknownEvent),
}

/// An event code this build has no name for.
///
/// Only produced by `Event::from(u32)`, so it never holds a known code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownEvent(u32);

impl UnknownEvent {
    pub fn code(self) -> u32 {
        self.0
    }
}

impl From<u32> for Event {
    fn from(value: u32) -> Self {
        match value {
            0 => Event::Connect,
            1 => Event::Disconnect,
            2 => Event::Shutdown,
            3 => Event::Loss,
            4 => Event::Available,
            n => Event::Other(UnknownEvent(n)),
        }
    }
}

impl From<Event> for u32 {
    fn from(event: Event) -> Self {
        match event {
            Event::Connect => 0,
            Event::Disconnect => 1,
            Event::Shutdown => 2,
            Event::Loss => 3,
            Event::Available => 4,
            Event::Other(unknown) => unknown.code(),
        }
    }
}

/// An event and the strings that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: Event,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<String>,
}

impl EventPayload {
    pub fn new(event: Event, data: Vec<String>) -> Self {
        Self { event, data }
    }
}

/// Reboot timings a node announces to the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootEstablishPayload {
    /// Reboot this long after the previous node has come back up.
    #[serde(with = "duration_nanos")]
    pub reboot_after: Duration,
    /// Consider the node dead after being down this long.
    #[serde(with = "duration_nanos")]
    pub dead_after: Duration,
}

/// Untyped payload for tags this build does not know.
///
/// The tag is never one of the typed tags, so a raw payload always decodes
/// back as raw.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPayload {
    type_tag: u32,
    fields: Map<String, Value>,
}

impl RawPayload {
    /// A raw payload tagged [`TYPE_UNKNOWN`].
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            type_tag: TYPE_UNKNOWN,
            fields,
        }
    }

    /// A raw payload with an explicit tag. Fails for the tags that belong to
    /// typed payloads.
    pub fn with_tag(type_tag: u32, fields: Map<String, Value>) -> Result<Self, ReservedTagError> {
        match type_tag {
            TYPE_EVENT | TYPE_REBOOT_ESTABLISH => Err(ReservedTagError(type_tag)),
            _ => Ok(Self { type_tag, fields }),
        }
    }

    /// The tag the payload arrived with, re-emitted on encode.
    pub fn type_tag(&self) -> u32 {
        self.type_tag
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// The closed set of payloads an envelope can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Event(EventPayload),
    RebootEstablish(RebootEstablishPayload),
    Raw(RawPayload),
}

impl Payload {
    pub fn type_tag(&self) -> u32 {
        match self {
            Payload::Event(_) => TYPE_EVENT,
            Payload::RebootEstablish(_) => TYPE_REBOOT_ESTABLISH,
            Payload::Raw(raw) => raw.type_tag,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Payload::Event(p) => serde_json::to_vec(p),
            Payload::RebootEstablish(p) => serde_json::to_vec(p),
            Payload::Raw(p) => serde_json::to_vec(&p.fields),
        }
    }

    fn from_bytes(type_tag: u32, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mismatch = |source| DecodeError::Payload { type_tag, source };
        let payload = match type_tag {
            TYPE_EVENT => Payload::Event(serde_json::from_slice(bytes).map_err(mismatch)?),
            TYPE_REBOOT_ESTABLISH => {
                Payload::RebootEstablish(serde_json::from_slice(bytes).map_err(mismatch)?)
            }
            _ => Payload::Raw(RawPayload {
                type_tag,
                fields: serde_json::from_slice(bytes).map_err(mismatch)?,
            }),
        };
        Ok(payload)
    }
}

impl From<EventPayload> for Payload {
    fn from(p: EventPayload) -> Self {
        Payload::Event(p)
    }
}

impl From<RebootEstablishPayload> for Payload {
    fn from(p: RebootEstablishPayload) -> Self {
        Payload::RebootEstablish(p)
    }
}

impl From<RawPayload> for Payload {
    fn from(p: RawPayload) -> Self {
        Payload::Raw(p)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One logical message. Equal `id`s mean the same message, whatever the
/// payload says.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    id: Uuid,
    source_id: String,
    payload: Payload,
}

#[derive(Serialize)]
struct WireOut<'a> {
    id: String,
    source_id: &'a str,
    #[serde(rename = "type")]
    type_tag: u32,
    data: String,
}

#[derive(Deserialize)]
struct WireIn {
    id: String,
    #[serde(default)]
    source_id: String,
    #[serde(rename = "type", default)]
    type_tag: u32,
    data: String,
}

impl Envelope {
    /// Create a new message with a fresh id.
    pub fn new(source_id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self::with_id(crate::id::message_id(), source_id, payload)
    }

    pub fn with_id(id: Uuid, source_id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            id,
            source_id: source_id.into(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn type_tag(&self) -> u32 {
        self.payload.type_tag()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Encode to the canonical JSON wire form.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        let payload_bytes = self.payload.to_bytes().map_err(EnvelopeError::Encode)?;
        let wire = WireOut {
            id: self.id.hyphenated().to_string(),
            source_id: &self.source_id,
            type_tag: self.type_tag(),
            data: STANDARD.encode(payload_bytes),
        };
        serde_json::to_string(&wire).map_err(EnvelopeError::Encode)
    }

    /// Decode from wire bytes (a text or binary frame body).
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireIn = serde_json::from_slice(bytes).map_err(DecodeError::Shape)?;
        let id = Uuid::parse_str(&wire.id).map_err(|source| DecodeError::Id {
            id: wire.id.clone(),
            source,
        })?;
        let payload_bytes = STANDARD.decode(wire.data.as_bytes()).map_err(DecodeError::from)?;
        let payload = Payload::from_bytes(wire.type_tag, &payload_bytes)?;
        Ok(Self {
            id,
            source_id: wire.source_id,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Durations as signed 64-bit nanoseconds, the range peers accept.
mod duration_nanos {
    use std::time::Duration;

    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(value.as_nanos()).map_err(|_| {
            <S::Error as ser::Error>::custom("duration exceeds i64 nanoseconds")
        })?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .map_err(|_| <D::Error as de::Error>::custom(format!("negative duration: {nanos}ns")))
    }
}
