//! Bridge event interception.
//!
//! An application can install one [`BridgeEventHandler`].  Every lifecycle
//! step of every connection is passed to it as a [`BridgeEvent`] before the
//! engine acts.  The handler may:
//!
//! - accept the event (`Ok(true)`), optionally after rewriting its payload,
//! - veto it (`Ok(false)`),
//! - fail (`Err(HookError)`), in which case nothing happens at all.
//!
//! # Stale sessions
//!
//! The handler runs asynchronously, and it holds a reference to the
//! connection.  By the time it answers, the connection may have been closed,
//! possibly by the handler itself.  [`HookDispatcher::dispatch`] samples the
//! session registry before and after the await and reports
//! [`HookOutcome::Stale`] when the connection's presence changed, so callers
//! never act on a session that no longer exists (or did not exist before).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::session::{BridgeSocket, SessionRegistry};
use crate::domain::events::BridgeEventType;

// ── Event ─────────────────────────────────────────────────────────────────────

/// One interceptable step in a connection's life.
#[derive(Debug)]
pub struct BridgeEvent {
    kind: BridgeEventType,
    payload: Option<Value>,
    socket: Arc<BridgeSocket>,
}

impl BridgeEvent {
    pub fn new(kind: BridgeEventType, payload: Option<Value>, socket: Arc<BridgeSocket>) -> Self {
        Self {
            kind,
            payload,
            socket,
        }
    }

    pub fn kind(&self) -> BridgeEventType {
        self.kind
    }

    /// The envelope the event is about, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Mutable access for handlers that rewrite the envelope before it is
    /// acted upon.
    pub fn payload_mut(&mut self) -> Option<&mut Value> {
        self.payload.as_mut()
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = Some(payload);
    }

    pub fn socket(&self) -> &Arc<BridgeSocket> {
        &self.socket
    }

    fn into_payload(self) -> Option<Value> {
        self.payload
    }
}

// ── Handler seam ──────────────────────────────────────────────────────────────

/// Error returned by a failing interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bridge event handler failed: {0}")]
pub struct HookError(pub String);

/// The optional external interceptor.
#[async_trait]
pub trait BridgeEventHandler: Send + Sync {
    /// Decides whether the engine may act on `event`.
    ///
    /// # Errors
    ///
    /// An error cancels the action without writing anything to the client.
    async fn handle(&self, event: &mut BridgeEvent) -> Result<bool, HookError>;
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// What the caller of [`HookDispatcher::dispatch`] should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Run the accept action with the (possibly rewritten) payload.
    Accepted(Option<Value>),
    /// Run the reject action.
    Rejected,
    /// The handler accepted but the session changed underneath it.  Callers
    /// treat this like [`HookOutcome::Rejected`].
    Stale,
    /// The handler failed.  Neither action runs.
    Failed,
}

/// Routes bridge events through the installed handler.
#[derive(Clone)]
pub struct HookDispatcher {
    handler: Option<Arc<dyn BridgeEventHandler>>,
    registry: Arc<SessionRegistry>,
}

impl HookDispatcher {
    pub fn new(handler: Option<Arc<dyn BridgeEventHandler>>, registry: Arc<SessionRegistry>) -> Self {
        Self { handler, registry }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub async fn dispatch(
        &self,
        kind: BridgeEventType,
        payload: Option<Value>,
        socket: &Arc<BridgeSocket>,
    ) -> HookOutcome {
        let Some(handler) = &self.handler else {
            return HookOutcome::Accepted(payload);
        };

        let id = socket.id();
        let present_before = self.registry.contains(id);
        let mut event = BridgeEvent::new(kind, payload, Arc::clone(socket));
        let result = handler.handle(&mut event).await;
        let present_after = self.registry.contains(id);

        match result {
            Err(err) => {
                warn!(conn = %id, event = %kind, "{err}");
                HookOutcome::Failed
            }
            Ok(false) => {
                debug!(conn = %id, event = %kind, "event rejected by handler");
                HookOutcome::Rejected
            }
            Ok(true) if present_before != present_after => {
                debug!(conn = %id, event = %kind, "session changed during handler; treating as rejected");
                HookOutcome::Stale
            }
            Ok(true) => HookOutcome::Accepted(event.into_payload()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
