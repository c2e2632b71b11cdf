//! Per-connection state and the connection handle shared with interceptors.
//!
//! Three pieces live here:
//!
//! - [`ClientSocket`] – the transport seam.  The engine writes frames and
//!   closes connections through it without knowing whether a WebSocket, a
//!   test double, or anything else sits underneath.
//! - [`BridgeSocket`] – the engine's wrapper around a transport.  This is the
//!   "connection reference" carried by every bridge event.  It makes `close`
//!   idempotent and drops writes after close.
//! - [`SessionRegistry`] and [`SessionState`] – the engine-wide table of live
//!   connections and the bookkeeping owned by one connection's actor task.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use busbridge_core::{ErrorCode, Principal, ServerEnvelope};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::application::bus::SubscriptionId;
use crate::application::connection::Command;

/// Close code used for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when the liveness deadline passes.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ── Connection identity ───────────────────────────────────────────────────────

/// Unique identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// An abstract duplex message channel to one client.
///
/// Implementations queue work and return immediately; none of these calls
/// may block.
pub trait ClientSocket: Send + Sync {
    /// Queues one text frame for the client.
    fn write(&self, frame: String);

    /// Closes the connection with a close code and reason.
    fn close(&self, code: u16, reason: &str);

    /// Stops reading frames from the client until [`ClientSocket::resume`].
    fn pause(&self);

    fn resume(&self);

    /// The authenticated identity, if the transport established one.
    fn principal(&self) -> Option<Principal>;
}

// ── Connection handle ─────────────────────────────────────────────────────────

/// The engine's handle to one connection.
///
/// Interceptors receive it inside every bridge event and may use it to write,
/// pause, resume or close the connection.
pub struct BridgeSocket {
    id: ConnectionId,
    inner: Arc<dyn ClientSocket>,
    closed: AtomicBool,
    registry: Arc<SessionRegistry>,
    commands: mpsc::UnboundedSender<Command>,
}

impl BridgeSocket {
    pub(crate) fn new(
        id: ConnectionId,
        inner: Arc<dyn ClientSocket>,
        registry: Arc<SessionRegistry>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            inner,
            closed: AtomicBool::new(false),
            registry,
            commands,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn principal(&self) -> Option<Principal> {
        self.inner.principal()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes a raw text frame.  Dropped silently once the socket is closed.
    pub fn write_text(&self, frame: String) {
        if self.is_closed() {
            debug!(conn = %self.id, "dropping write to closed socket");
            return;
        }
        self.inner.write(frame);
    }

    pub fn write_value(&self, value: &Value) {
        self.write_text(value.to_string());
    }

    pub fn write(&self, envelope: &ServerEnvelope) {
        self.write_text(envelope.encode());
    }

    /// Writes `{"type":"err","body":<code>}`.
    pub fn write_error(&self, code: ErrorCode) {
        self.write(&ServerEnvelope::Error(code));
    }

    pub fn pause(&self) {
        self.inner.pause();
    }

    pub fn resume(&self) {
        self.inner.resume();
    }

    /// Closes the connection normally.
    pub fn close(&self) {
        self.close_with(CLOSE_NORMAL, "");
    }

    /// Closes the connection because the client stopped pinging.
    pub fn close_session_expired(&self) {
        self.close_with(CLOSE_GOING_AWAY, "Session expired");
    }

    /// Closes the connection.  Only the first call has any effect.
    ///
    /// The connection leaves the session registry before this returns, so a
    /// hook that closes the socket is seen as stale by the dispatcher.
    pub fn close_with(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.remove(self.id);
        self.inner.close(code, reason);
        // The actor may already be gone.
        let _ = self.commands.send(Command::Closed);
    }

    /// Posts a continuation to the connection's actor.
    pub(crate) fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(conn = %self.id, "actor gone; continuation dropped");
        }
    }
}

impl fmt::Debug for BridgeSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSocket")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Session registry ──────────────────────────────────────────────────────────

/// Engine-wide table of live connections.
///
/// Presence in this table is what the hook dispatcher samples before and
/// after an interceptor runs.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Command>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: ConnectionId, commands: mpsc::UnboundedSender<Command>) {
        self.lock().insert(id, commands);
    }

    /// Removes a connection.  Returns `false` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub(crate) fn sender(&self, id: ConnectionId) -> Option<mpsc::UnboundedSender<Command>> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<Command>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Session state ─────────────────────────────────────────────────────────────

/// A subscription installed on behalf of the client.
#[derive(Debug)]
pub struct ActiveSubscription {
    pub id: SubscriptionId,
    /// The task moving bus messages from the subscription to the client.
    pub forwarder: JoinHandle<()>,
}

/// Bookkeeping for one connection.  Owned by that connection's actor.
#[derive(Debug)]
pub struct SessionState {
    /// Client subscriptions keyed by address.
    pub subscriptions: HashMap<String, ActiveSubscription>,
    /// Subscriptions plus outstanding replies.
    pub handler_count: usize,
    pub last_ping: Instant,
    pub liveness: Option<JoinHandle<()>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            handler_count: 0,
            last_ping: Instant::now(),
            liveness: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSocket {
        frames: Mutex<Vec<String>>,
        closes: Mutex<Vec<(u16, String)>>,
    }

    impl ClientSocket for RecordingSocket {
        fn write(&self, frame: String) {
            self.frames.lock().unwrap().push(frame);
        }
        fn close(&self, code: u16, reason: &str) {
            self.closes.lock().unwrap().push((code, reason.to_string()));
        }
        fn pause(&self) {}
        fn resume(&self) {}
        fn principal(&self) -> Option<Principal> {
            None
        }
    }

    fn socket() -> (
        BridgeSocket,
        Arc<RecordingSocket>,
        Arc<SessionRegistry>,
        mpsc::UnboundedReceiver<Command>,
    ) {
        let inner = Arc::new(RecordingSocket::default());
        let registry = Arc::new(SessionRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.insert(id, tx.clone());
        let sock = BridgeSocket::new(id, inner.clone(), Arc::clone(&registry), tx);
        (sock, inner, registry, rx)
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_write_error_encodes_err_envelope() {
        // Arrange
        let (sock, inner, _registry, _rx) = socket();

        // Act
        sock.write_error(ErrorCode::AccessDenied);

        // Assert
        let frames = inner.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value, serde_json::json!({"type": "err", "body": "access_denied"}));
    }

    #[test]
    fn test_close_is_idempotent() {
        // Arrange
        let (sock, inner, registry, mut rx) = socket();

        // Act
        sock.close_session_expired();
        sock.close();

        // Assert: the transport saw exactly one close, with the first code
        let closes = inner.closes.lock().unwrap();
        assert_eq!(closes.as_slice(), &[(1001, "Session expired".to_string())]);
        assert!(registry.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Command::Closed)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_write_after_close_is_dropped() {
        let (sock, inner, _registry, _rx) = socket();

        sock.close();
        sock.write_error(ErrorCode::Rejected);

        assert!(inner.frames.lock().unwrap().is_empty());
        assert!(sock.is_closed());
    }

    #[test]
    fn test_registry_remove_reports_presence() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.insert(id, tx);

        assert!(registry.contains(id));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_new_session_state_is_empty() {
        let state = SessionState::new();
        assert_eq!(state.handler_count, 0);
        assert!(state.subscriptions.is_empty());
        assert!(state.liveness.is_none());
    }
}
