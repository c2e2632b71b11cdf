//! Error codes sent to clients in `{"type":"err","body":<code>}` envelopes.
//!
//! Every per-message failure is reported with one of these codes and the
//! connection stays open.  The string forms are part of the wire protocol and
//! must never change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A protocol-level failure reported back to the client.
///
/// # Serde representation
///
/// ```json
/// "access_denied"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The frame was not a JSON object.
    InvalidJson,
    /// The envelope has no `type` field.
    MissingType,
    /// A non-ping envelope has no `address` field.
    MissingAddress,
    /// The `type` field is not one of the known envelope kinds.
    InvalidType,
    /// A `register` address is longer than the configured maximum.
    MaxAddressLengthReached,
    /// The connection already holds the maximum number of handlers.
    MaxHandlersReached,
    /// No permission rule matched.
    AccessDenied,
    /// The bridge event interceptor vetoed the action, or the connection
    /// changed state while the interceptor was running.
    Rejected,
    /// A rule requires an authority but the connection is anonymous.
    NotLoggedIn,
    /// The authorization provider failed to load authorities.
    AuthError,
    /// The `replyAddress` is longer than 36 characters.
    InvalidReplyAddress,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "invalid_json",
            ErrorCode::MissingType => "missing_type",
            ErrorCode::MissingAddress => "missing_address",
            ErrorCode::InvalidType => "invalid_type",
            ErrorCode::MaxAddressLengthReached => "max_address_length_reached",
            ErrorCode::MaxHandlersReached => "max_handlers_reached",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::Rejected => "rejected",
            ErrorCode::NotLoggedIn => "not_logged_in",
            ErrorCode::AuthError => "auth_error",
            ErrorCode::InvalidReplyAddress => "invalid_reply_address",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
