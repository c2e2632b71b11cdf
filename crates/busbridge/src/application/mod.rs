//! Application layer for busbridge.
//!
//! The application layer orchestrates the bridge: it knows *what* has to
//! happen to every frame and bus message, but reaches sockets, the bus and
//! the authority source only through traits.
//!
//! # Responsibilities
//!
//! - Accepting connections and running one actor task per connection
//! - Applying permission rules and authority checks in both directions
//! - Correlating replies and enforcing the per-connection handler quota
//! - Routing lifecycle events through the optional interceptor
//! - Closing connections that stop pinging
//!
//! # What does NOT belong here?
//!
//! - Listening for connections or WebSocket framing (infrastructure)
//! - A concrete bus implementation (infrastructure)
//! - Reading configuration files (infrastructure)

pub mod authorization;
pub mod bus;
pub mod connection;
pub mod engine;
pub mod hooks;
pub mod liveness;
pub mod replies;
pub mod session;

pub use authorization::{AuthError, AuthorizationProvider, Authorizer, AuthzError};
pub use bus::{
    BusMessage, DeliveryOptions, EventBus, FailureType, ReplyFailure, Subscription, SubscriptionId,
};
pub use engine::{BridgeEngine, BridgeEngineBuilder, EngineError};
pub use hooks::{BridgeEvent, BridgeEventHandler, HookDispatcher, HookError, HookOutcome};
pub use replies::ReplyCorrelator;
pub use session::{BridgeSocket, ClientSocket, ConnectionId, SessionRegistry};
