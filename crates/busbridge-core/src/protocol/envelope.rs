//! Client → bridge envelopes and the frame decoder.
//!
//! Every frame a client sends is one JSON object with a `"type"` field that
//! identifies the action.  For example:
//!
//! ```json
//! {"type":"send","address":"orders","body":{"id":7},"replyAddress":"2f1c..."}
//! {"type":"register","address":"news.sports"}
//! {"type":"ping"}
//! ```
//!
//! # Why keep the raw JSON around?
//!
//! Bridge event interceptors see (and may rewrite) the envelope exactly as the
//! client sent it, including fields the bridge does not understand.  The
//! decoded [`ClientEnvelope`] therefore keeps the original object alongside
//! the typed fields, and can be rebuilt from a rewritten object with
//! [`ClientEnvelope::with_kind`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::codes::ErrorCode;
use crate::protocol::headers::Headers;

/// Longest reply address a client may supply.
///
/// Client libraries generate UUID strings (36 characters) as reply addresses;
/// anything longer is refused before it reaches the bus.
pub const MAX_REPLY_ADDRESS_LEN: usize = 36;

/// Errors produced while decoding a client frame.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame is not a JSON object.
    #[error("frame is not a JSON object: {0}")]
    InvalidJson(String),

    /// The object has no string `type` field.
    #[error("envelope has no type")]
    MissingType,

    /// A non-ping envelope has no string `address` field.
    #[error("envelope has no address")]
    MissingAddress,

    /// The `type` field names an unknown action.
    #[error("unknown envelope type: {0}")]
    InvalidType(String),
}

impl ProtocolError {
    /// Maps the decode failure to the code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::InvalidJson(_) => ErrorCode::InvalidJson,
            ProtocolError::MissingType => ErrorCode::MissingType,
            ProtocolError::MissingAddress => ErrorCode::MissingAddress,
            ProtocolError::InvalidType(_) => ErrorCode::InvalidType,
        }
    }
}

/// The action a client envelope asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Liveness signal; carries no address.
    Ping,
    /// Point-to-point message, optionally expecting a reply.
    Send,
    /// Broadcast to every consumer of the address.
    Publish,
    /// Subscribe the connection to an address.
    Register,
    /// Drop a subscription.
    Unregister,
}

impl EnvelopeKind {
    /// Parses the `type` field value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ping" => Some(EnvelopeKind::Ping),
            "send" => Some(EnvelopeKind::Send),
            "publish" => Some(EnvelopeKind::Publish),
            "register" => Some(EnvelopeKind::Register),
            "unregister" => Some(EnvelopeKind::Unregister),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Ping => "ping",
            EnvelopeKind::Send => "send",
            EnvelopeKind::Publish => "publish",
            EnvelopeKind::Register => "register",
            EnvelopeKind::Unregister => "unregister",
        }
    }
}

/// A decoded client envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEnvelope {
    pub kind: EnvelopeKind,
    /// Target address.  Always `Some` for every kind except [`EnvelopeKind::Ping`].
    pub address: Option<String>,
    /// Message body; `Value::Null` when absent.
    pub body: Value,
    pub headers: Option<Headers>,
    pub reply_address: Option<String>,
    /// The object exactly as received.
    pub raw: Value,
}

impl ClientEnvelope {
    /// Rebuilds an envelope of a known `kind` from a JSON object.
    ///
    /// Used after an interceptor had the chance to rewrite the payload: the
    /// action is already decided, only the fields are read again.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidJson`] if `raw` is not an object.
    /// - [`ProtocolError::MissingAddress`] if a non-ping envelope has no address.
    pub fn with_kind(kind: EnvelopeKind, raw: Value) -> Result<Self, ProtocolError> {
        let object = raw
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidJson("payload is not an object".to_string()))?;

        let address = string_field(object, "address");
        if kind != EnvelopeKind::Ping && address.is_none() {
            return Err(ProtocolError::MissingAddress);
        }

        let body = object.get("body").cloned().unwrap_or(Value::Null);
        let headers = object
            .get("headers")
            .and_then(Value::as_object)
            .map(Headers::from_json);
        let reply_address = string_field(object, "replyAddress");

        Ok(Self {
            kind,
            address,
            body,
            headers,
            reply_address,
            raw,
        })
    }

    /// Returns the address, or an empty string for pings.
    pub fn address_or_empty(&self) -> &str {
        self.address.as_deref().unwrap_or("")
    }
}

/// Decodes one client frame.
///
/// Validation order follows the protocol: JSON shape, then `type`, then (for
/// everything except `ping`) `address`, and only then whether the `type` is
/// known.  A frame `{"type":"bogus"}` therefore reports `missing_address`.
///
/// # Errors
///
/// Returns the [`ProtocolError`] whose [`ProtocolError::code`] must be sent
/// back to the client.
///
/// # Examples
///
/// ```rust
/// use busbridge_core::{decode_frame, EnvelopeKind};
///
/// let env = decode_frame(br#"{"type":"publish","address":"news","body":1}"#).unwrap();
/// assert_eq!(env.kind, EnvelopeKind::Publish);
/// assert_eq!(env.address.as_deref(), Some("news"));
/// ```
pub fn decode_frame(bytes: &[u8]) -> Result<ClientEnvelope, ProtocolError> {
    let raw: Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let object = raw
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidJson("top-level value is not an object".to_string()))?;

    let type_name = string_field(object, "type").ok_or(ProtocolError::MissingType)?;

    if type_name != "ping" && string_field(object, "address").is_none() {
        return Err(ProtocolError::MissingAddress);
    }

    let kind = EnvelopeKind::parse(&type_name).ok_or(ProtocolError::InvalidType(type_name))?;
    ClientEnvelope::with_kind(kind, raw)
}

fn string_field(object: &Map<String, Value>, name: &str) -> Option<String> {
    object.get(name).and_then(Value::as_str).map(str::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
