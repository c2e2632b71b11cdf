//! Domain layer for busbridge.
//!
//! The domain layer contains plain data types that have no dependencies on
//! I/O, the async runtime, or the bus.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - The catalogue of bridge event kinds
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, socket, or bus types
//! - File I/O or environment variable reading

pub mod config;
pub mod events;

pub use config::{BridgeConfig, BridgeOptions, PrincipalEntry, ServerConfig};
pub use events::BridgeEventType;
