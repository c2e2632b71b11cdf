//! Infrastructure layer for busbridge.
//!
//! The infrastructure layer handles all I/O and provides the concrete
//! implementations of the application layer's traits.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket upgrade
//! - Resolving bearer tokens to principals
//! - Running an in-process event bus
//! - Loading the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Permission rules, reply tracking, hooks (application layer)
//! - Configuration types (domain layer)

pub mod config_file;
pub mod local_bus;
pub mod static_auth;
pub mod ws_server;

pub use config_file::{load_config, validate_config, ConfigError};
pub use local_bus::LocalBus;
pub use static_auth::StaticPrincipals;
pub use ws_server::run_server;
