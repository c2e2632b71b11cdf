//! Protocol module containing the client envelope types and their JSON codec.

pub mod codes;
pub mod envelope;
pub mod headers;
pub mod server;

pub use codes::ErrorCode;
pub use envelope::{decode_frame, ClientEnvelope, EnvelopeKind, ProtocolError, MAX_REPLY_ADDRESS_LEN};
pub use headers::Headers;
pub use server::ServerEnvelope;
