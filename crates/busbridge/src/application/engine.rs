//! The bridge engine: public entry points for transports.
//!
//! A transport (the WebSocket server, a test harness, …) drives the engine
//! with four calls:
//!
//! | Call                      | When                                        |
//! |---------------------------|---------------------------------------------|
//! | [`BridgeEngine::on_connect`]           | a client connected             |
//! | [`BridgeEngine::on_frame`]             | a frame arrived from a client  |
//! | [`BridgeEngine::on_connection_closed`] | the client went away           |
//! | [`BridgeEngine::on_connection_error`]  | the transport failed           |
//!
//! Everything else (writing to the client, closing it) flows back through the
//! [`ClientSocket`] the transport handed to `on_connect`.
//!
//! # Ownership model
//!
//! The engine is cheap to clone; all clones share one [`BridgeContext`].  Each
//! accepted connection gets its own actor task (see `connection.rs`) and is
//! addressed by its [`ConnectionId`] through the session registry.

use std::sync::Arc;

use busbridge_core::{PatternCache, PermissionMatcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::application::authorization::{AuthorizationProvider, Authorizer};
use crate::application::bus::EventBus;
use crate::application::connection::{Command, Connection};
use crate::application::hooks::{BridgeEventHandler, HookDispatcher, HookOutcome};
use crate::application::replies::ReplyCorrelator;
use crate::application::session::{BridgeSocket, ClientSocket, ConnectionId, SessionRegistry};
use crate::domain::config::BridgeOptions;
use crate::domain::events::BridgeEventType;

/// Errors returned by the engine's entry points.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("connection {0} was rejected by the bridge event handler")]
    Rejected(ConnectionId),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Engine-scoped state shared by every connection.
pub(crate) struct BridgeContext {
    pub(crate) options: BridgeOptions,
    /// Client → bus rules.
    pub(crate) inbound: PermissionMatcher,
    /// Bus → client rules.
    pub(crate) outbound: PermissionMatcher,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) authorizer: Authorizer,
    pub(crate) hooks: HookDispatcher,
    pub(crate) replies: ReplyCorrelator,
    pub(crate) registry: Arc<SessionRegistry>,
}

/// Assembles a [`BridgeEngine`].
pub struct BridgeEngineBuilder {
    options: BridgeOptions,
    bus: Arc<dyn EventBus>,
    provider: Option<Arc<dyn AuthorizationProvider>>,
    handler: Option<Arc<dyn BridgeEventHandler>>,
}

impl BridgeEngineBuilder {
    pub fn authorization_provider(mut self, provider: Arc<dyn AuthorizationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn BridgeEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> BridgeEngine {
        // One cache for both rule lists: patterns are compiled once per engine.
        let patterns = Arc::new(PatternCache::new());
        let registry = Arc::new(SessionRegistry::new());
        let context = BridgeContext {
            inbound: PermissionMatcher::new(self.options.inbound.clone(), Arc::clone(&patterns)),
            outbound: PermissionMatcher::new(self.options.outbound.clone(), patterns),
            options: self.options,
            bus: self.bus,
            authorizer: Authorizer::new(self.provider),
            hooks: HookDispatcher::new(self.handler, Arc::clone(&registry)),
            replies: ReplyCorrelator::new(),
            registry,
        };
        BridgeEngine {
            context: Arc::new(context),
        }
    }
}

/// The protocol bridge between client connections and the event bus.
#[derive(Clone)]
pub struct BridgeEngine {
    context: Arc<BridgeContext>,
}

impl BridgeEngine {
    pub fn builder(options: BridgeOptions, bus: Arc<dyn EventBus>) -> BridgeEngineBuilder {
        BridgeEngineBuilder {
            options,
            bus,
            provider: None,
            handler: None,
        }
    }

    /// An engine with no authorization provider and no interceptor.
    pub fn new(options: BridgeOptions, bus: Arc<dyn EventBus>) -> Self {
        Self::builder(options, bus).build()
    }

    /// Accepts a new client connection.
    ///
    /// Raises `SOCKET_CREATED`.  When the handler accepts, the connection's
    /// actor is started and its id returned; otherwise the socket is closed.
    ///
    /// # Errors
    ///
    /// [`EngineError::Rejected`] if the handler vetoed, failed, or closed the
    /// socket while deciding.
    pub async fn on_connect(&self, socket: Arc<dyn ClientSocket>) -> Result<ConnectionId, EngineError> {
        let ctx = &self.context;
        let id = ConnectionId::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        ctx.registry.insert(id, commands_tx.clone());
        let socket = Arc::new(BridgeSocket::new(
            id,
            socket,
            Arc::clone(&ctx.registry),
            commands_tx.clone(),
        ));

        match ctx.hooks.dispatch(BridgeEventType::SocketCreated, None, &socket).await {
            HookOutcome::Accepted(_) => {
                info!(conn = %id, "connection accepted");
                let connection = Connection::new(Arc::clone(ctx), socket, commands_tx, commands_rx);
                tokio::spawn(connection.run());
                Ok(id)
            }
            HookOutcome::Rejected | HookOutcome::Stale | HookOutcome::Failed => {
                info!(conn = %id, "connection refused by bridge event handler");
                socket.close();
                Err(EngineError::Rejected(id))
            }
        }
    }

    /// Hands one raw client frame to the connection's actor.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownConnection`] if the connection is closed or was
    /// never accepted.
    pub fn on_frame(&self, id: ConnectionId, frame: Vec<u8>) -> Result<(), EngineError> {
        self.post(id, Command::Frame(frame))
    }

    /// The transport reports that the client went away.
    pub fn on_connection_closed(&self, id: ConnectionId) {
        if self.post(id, Command::Closed).is_err() {
            debug!(conn = %id, "close for a connection that is already gone");
        }
    }

    /// The transport failed.  The connection is torn down and `SOCKET_ERROR`
    /// is raised with the error text.
    pub fn on_connection_error(&self, id: ConnectionId, error: impl Into<String>) {
        if self.post(id, Command::Error(error.into())).is_err() {
            debug!(conn = %id, "error for a connection that is already gone");
        }
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.context.registry.contains(id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.context.registry.len()
    }

    /// Number of reply addresses currently awaiting a client answer.
    pub fn pending_replies(&self) -> usize {
        self.context.replies.len()
    }

    fn post(&self, id: ConnectionId, command: Command) -> Result<(), EngineError> {
        let sender = self
            .context
            .registry
            .sender(id)
            .ok_or(EngineError::UnknownConnection(id))?;
        sender
            .send(command)
            .map_err(|_| EngineError::UnknownConnection(id))
    }
}
