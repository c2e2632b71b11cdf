//! Domain layer: access-control rules and identities.
//!
//! Everything here is pure: no async, no sockets, no bus.  The bridge engine
//! calls into these types on every message, so they are also kept cheap.

pub mod authority;
pub mod patterns;
pub mod permission;
pub mod structure;
