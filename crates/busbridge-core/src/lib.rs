//! # busbridge-core
//!
//! Shared library for busbridge containing the client-facing wire protocol,
//! the permission rule model, and the authority types used for access control.
//!
//! This crate is used by the bridge engine and by anything that needs to speak
//! the envelope protocol.  It has zero dependencies on async runtimes, network
//! sockets, or the bus implementation.
//!
//! # Architecture overview (for beginners)
//!
//! busbridge lets untrusted clients (browsers, scripts, devices) talk to a
//! server-side publish/subscribe *event bus*.  Clients send small JSON objects
//! called *envelopes*; the bridge decides whether each envelope is allowed to
//! cross into the bus, and whether each bus message is allowed to cross back
//! out to the client.
//!
//! This crate (`busbridge-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – What travels over the client connection.  Envelopes are
//!   decoded from JSON text into typed Rust values, and server replies are
//!   encoded back into JSON.
//!
//! - **`domain`** – Pure access-control logic with no I/O.  The most important
//!   piece is the [`PermissionMatcher`]: an ordered list of rules that decides
//!   whether an (address, body) pair may pass, and which authority, if any,
//!   the caller must hold.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `busbridge_core::PermissionMatcher` instead of the full module path.
pub use domain::authority::{Authority, Principal};
pub use domain::patterns::PatternCache;
pub use domain::permission::{MatchResult, PermissionMatcher, PermissionRule};
pub use domain::structure::structure_matches;
pub use protocol::codes::ErrorCode;
pub use protocol::envelope::{decode_frame, ClientEnvelope, EnvelopeKind, ProtocolError, MAX_REPLY_ADDRESS_LEN};
pub use protocol::headers::Headers;
pub use protocol::server::ServerEnvelope;
