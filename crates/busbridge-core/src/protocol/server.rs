//! Bridge → client envelopes.
//!
//! Four shapes travel from the bridge to a client:
//!
//! ```json
//! {"type":"rec","address":"news","body":{"x":1},"headers":{"h":"v"},"replyAddress":"..."}
//! {"type":"err","body":"access_denied"}
//! {"type":"err","address":"r1","failureCode":-1,"failureType":"TIMEOUT","message":"..."}
//! {"type":"err","failureType":"socketException","message":"connection reset"}
//! ```
//!
//! The last one never reaches the client: it is the payload of the
//! `SOCKET_ERROR` bridge event.  All three `err` shapes share the same tag, so
//! the envelope is converted with `json!` rather than a derived serializer.

use serde_json::{json, Map, Value};

use crate::protocol::codes::ErrorCode;
use crate::protocol::headers::Headers;

/// Every envelope the bridge can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEnvelope {
    /// A bus message delivered to the client.
    Receive {
        address: String,
        body: Value,
        headers: Option<Headers>,
        reply_address: Option<String>,
    },
    /// A protocol-level error.
    Error(ErrorCode),
    /// A request/reply round trip failed on the bus.
    ReplyFailure {
        address: String,
        failure_code: i32,
        failure_type: String,
        message: String,
    },
    /// A transport failure, used as the `SOCKET_ERROR` event payload.
    SocketException { message: Option<String> },
}

impl ServerEnvelope {
    /// Converts the envelope into its JSON object form.
    pub fn to_value(&self) -> Value {
        match self {
            ServerEnvelope::Receive {
                address,
                body,
                headers,
                reply_address,
            } => {
                let mut object = Map::new();
                object.insert("type".to_string(), json!("rec"));
                object.insert("address".to_string(), json!(address));
                object.insert("body".to_string(), body.clone());
                if let Some(reply) = reply_address {
                    object.insert("replyAddress".to_string(), json!(reply));
                }
                // Empty header maps are omitted entirely.
                if let Some(headers) = headers.as_ref().filter(|h| !h.is_empty()) {
                    object.insert("headers".to_string(), Value::Object(headers.to_json()));
                }
                Value::Object(object)
            }
            ServerEnvelope::Error(code) => json!({"type": "err", "body": code.as_str()}),
            ServerEnvelope::ReplyFailure {
                address,
                failure_code,
                failure_type,
                message,
            } => json!({
                "type": "err",
                "address": address,
                "failureCode": failure_code,
                "failureType": failure_type,
                "message": message,
            }),
            ServerEnvelope::SocketException { message } => {
                let mut object = Map::new();
                object.insert("type".to_string(), json!("err"));
                object.insert("failureType".to_string(), json!("socketException"));
                if let Some(message) = message {
                    object.insert("message".to_string(), json!(message));
                }
                Value::Object(object)
            }
        }
    }

    /// Encodes the envelope as a JSON text frame.
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
