//! busbridge library crate.
//!
//! This crate lets untrusted client connections exchange messages with a
//! server-side event bus while enforcing per-address permission rules,
//! request/reply correlation, liveness checks and an optional interceptor
//! that can veto or rewrite every lifecycle event.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Client (JSON envelopes over WebSocket)
//!         ↕
//! [busbridge]
//!   ├── domain/            Pure types: BridgeConfig, bridge event kinds
//!   ├── application/       Engine, connection actors, hooks, replies, authz
//!   └── infrastructure/
//!         ├── ws_server/   WebSocket accept loop (tokio-tungstenite)
//!         ├── local_bus/   In-process event bus
//!         ├── config_file/ TOML configuration loading
//!         └── static_auth/ Token → principal table from the config file
//!         ↕
//! Event bus (EventBus trait)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async runtime.
//! - `application` depends on `domain` and `busbridge-core`; it reaches the
//!   transport, the bus and the authority source only through traits
//!   ([`application::ClientSocket`], [`application::EventBus`],
//!   [`application::AuthorizationProvider`]).
//! - `infrastructure` implements those traits and owns sockets and files.
//!
//! # For beginners: why this structure?
//!
//! The engine can be tested end to end with an in-memory socket and the
//! in-process bus, without opening a single network port.  Swapping the
//! WebSocket server for another transport touches only `infrastructure`.

/// Domain layer: configuration and event kinds (no I/O).
pub mod domain;

/// Application layer: the bridge engine and its collaborators.
pub mod application;

/// Infrastructure layer: WebSocket server, in-process bus, config file.
pub mod infrastructure;
