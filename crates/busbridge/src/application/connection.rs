//! One connection's actor.
//!
//! Every accepted connection runs a [`Connection`] task that owns the
//! connection's [`SessionState`] and drains a private command queue.  Anything
//! that needs to change the session (a frame, a liveness tick, a hook that
//! accepted a `register`, a settled request) arrives here as a [`Command`], so
//! `handler_count`, `subscriptions` and `last_ping` are only ever touched from
//! this one task.
//!
//! Slow work never runs inside the actor.  Interceptor calls, authorization
//! and bus requests run in spawned tasks that post their continuation back
//! with [`BridgeSocket::post`].
//!
//! # Frame flow
//!
//! ```text
//! Frame ─► decode ─┬─ ping ────────► last_ping = now, SOCKET_PING
//!                  ├─ send/publish ► [task] hook ─► rules ─► authz ─► Forward
//!                  ├─ register ────► quota ─► [task] hook ─► Register
//!                  └─ unregister ──► [task] hook ─► Unregister
//! ```

use std::sync::Arc;

use busbridge_core::{
    decode_frame, ClientEnvelope, EnvelopeKind, ErrorCode, Headers, ProtocolError, ServerEnvelope,
    MAX_REPLY_ADDRESS_LEN,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::bus::{BusMessage, DeliveryOptions, Subscription};
use crate::application::engine::BridgeContext;
use crate::application::hooks::HookOutcome;
use crate::application::liveness::{is_idle, spawn_liveness};
use crate::application::session::{ActiveSubscription, BridgeSocket, ConnectionId, SessionState};
use crate::domain::events::BridgeEventType;

// ── Commands ──────────────────────────────────────────────────────────────────

/// Work items for a connection's actor.
#[derive(Debug)]
pub enum Command {
    /// A raw frame from the client.
    Frame(Vec<u8>),
    /// The liveness timer fired.
    LivenessCheck,
    /// The `REGISTER` hook accepted this envelope.
    Register(ClientEnvelope),
    /// The `UNREGISTER` hook accepted this address.
    Unregister(String),
    /// A `send`/`publish` passed rules and authorization.
    Forward(ForwardRequest),
    /// An outstanding request finished.
    ReplySettled,
    /// The connection was closed.
    Closed,
    /// The transport failed.
    Error(String),
}

/// A client `send` or `publish` that is cleared to reach the bus.
#[derive(Debug)]
pub struct ForwardRequest {
    pub kind: EnvelopeKind,
    pub address: String,
    pub body: Value,
    pub headers: Headers,
    pub reply_address: Option<String>,
    /// The delivered message this send answers, if it targets a reply address.
    pub awaiting: Option<BusMessage>,
}

// ── Actor ─────────────────────────────────────────────────────────────────────

pub(crate) struct Connection {
    ctx: Arc<BridgeContext>,
    socket: Arc<BridgeSocket>,
    state: SessionState,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Connection {
    pub(crate) fn new(
        ctx: Arc<BridgeContext>,
        socket: Arc<BridgeSocket>,
        commands_tx: mpsc::UnboundedSender<Command>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            ctx,
            socket,
            state: SessionState::new(),
            commands_tx,
            commands,
        }
    }

    /// Drains the command queue until the connection closes.
    pub(crate) async fn run(mut self) {
        self.state.last_ping = Instant::now();
        self.state.liveness = Some(spawn_liveness(
            self.ctx.options.ping_timeout(),
            self.commands_tx.clone(),
        ));

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Frame(frame) => self.on_frame(&frame),
                Command::LivenessCheck => self.on_liveness_check(),
                Command::Register(envelope) => self.register(envelope).await,
                Command::Unregister(address) => self.unregister(&address).await,
                Command::Forward(request) => self.forward(request).await,
                Command::ReplySettled => {
                    self.state.handler_count = self.state.handler_count.saturating_sub(1);
                }
                Command::Closed => {
                    self.shutdown(None).await;
                    break;
                }
                Command::Error(message) => {
                    self.shutdown(Some(message)).await;
                    break;
                }
            }
        }
    }

    fn id(&self) -> ConnectionId {
        self.socket.id()
    }

    // ── Frames ────────────────────────────────────────────────────────────────

    fn on_frame(&mut self, frame: &[u8]) {
        let envelope = match decode_frame(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(conn = %self.id(), "bad frame: {err}");
                self.socket.write_error(err.code());
                return;
            }
        };

        match envelope.kind {
            EnvelopeKind::Ping => {
                self.state.last_ping = Instant::now();
                self.spawn_notify(BridgeEventType::SocketPing, None);
            }
            EnvelopeKind::Send | EnvelopeKind::Publish => self.begin_send_or_publish(envelope),
            EnvelopeKind::Register => self.begin_register(envelope),
            EnvelopeKind::Unregister => self.begin_unregister(envelope),
        }
    }

    /// Raises an informational event; the outcome does not matter.
    fn spawn_notify(&self, kind: BridgeEventType, payload: Option<Value>) {
        let ctx = Arc::clone(&self.ctx);
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            ctx.hooks.dispatch(kind, payload, &socket).await;
        });
    }

    fn begin_send_or_publish(&self, envelope: ClientEnvelope) {
        let ctx = Arc::clone(&self.ctx);
        let socket = Arc::clone(&self.socket);
        let event = if envelope.kind == EnvelopeKind::Send {
            BridgeEventType::Send
        } else {
            BridgeEventType::Publish
        };

        tokio::spawn(async move {
            match ctx.hooks.dispatch(event, Some(envelope.raw.clone()), &socket).await {
                HookOutcome::Accepted(payload) => match reread(envelope, payload) {
                    Ok(envelope) => match check_send(&ctx, &socket, envelope).await {
                        Ok(request) => socket.post(Command::Forward(request)),
                        Err(code) => socket.write_error(code),
                    },
                    Err(err) => socket.write_error(err.code()),
                },
                HookOutcome::Rejected | HookOutcome::Stale => socket.write_error(ErrorCode::Rejected),
                HookOutcome::Failed => {}
            }
        });
    }

    fn begin_register(&self, envelope: ClientEnvelope) {
        if self.state.handler_count >= self.ctx.options.max_handlers_per_socket {
            self.socket.write_error(ErrorCode::MaxHandlersReached);
            return;
        }

        let ctx = Arc::clone(&self.ctx);
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            match ctx
                .hooks
                .dispatch(BridgeEventType::Register, Some(envelope.raw.clone()), &socket)
                .await
            {
                HookOutcome::Accepted(payload) => match reread(envelope, payload) {
                    Ok(envelope) => socket.post(Command::Register(envelope)),
                    Err(err) => socket.write_error(err.code()),
                },
                HookOutcome::Rejected | HookOutcome::Stale => socket.write_error(ErrorCode::Rejected),
                HookOutcome::Failed => {}
            }
        });
    }

    fn begin_unregister(&self, envelope: ClientEnvelope) {
        let ctx = Arc::clone(&self.ctx);
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            match ctx
                .hooks
                .dispatch(BridgeEventType::Unregister, Some(envelope.raw.clone()), &socket)
                .await
            {
                HookOutcome::Accepted(payload) => match reread(envelope, payload) {
                    Ok(envelope) => {
                        socket.post(Command::Unregister(envelope.address_or_empty().to_string()))
                    }
                    Err(err) => socket.write_error(err.code()),
                },
                HookOutcome::Rejected | HookOutcome::Stale => socket.write_error(ErrorCode::Rejected),
                HookOutcome::Failed => {}
            }
        });
    }

    // ── Continuations ─────────────────────────────────────────────────────────

    async fn register(&mut self, envelope: ClientEnvelope) {
        let address = envelope.address_or_empty().to_string();
        let options = &self.ctx.options;

        if address.chars().count() > options.max_address_length {
            self.socket.write_error(ErrorCode::MaxAddressLengthReached);
            return;
        }
        let replacing = self.state.subscriptions.contains_key(&address);
        // The hook ran concurrently with other registers.
        if !replacing && self.state.handler_count >= options.max_handlers_per_socket {
            self.socket.write_error(ErrorCode::MaxHandlersReached);
            return;
        }
        if !self.ctx.outbound.evaluate(&address, None).matched {
            debug!(conn = %self.id(), %address, "register denied");
            self.socket.write_error(ErrorCode::AccessDenied);
            return;
        }

        if let Some(previous) = self.state.subscriptions.remove(&address) {
            previous.forwarder.abort();
            self.ctx.bus.unsubscribe(previous.id).await;
        } else {
            self.state.handler_count += 1;
        }

        let subscription = self.ctx.bus.subscribe(&address).await;
        let id = subscription.id;
        let forwarder = tokio::spawn(forward_subscription(
            Arc::clone(&self.ctx),
            Arc::clone(&self.socket),
            subscription,
        ));
        self.state
            .subscriptions
            .insert(address.clone(), ActiveSubscription { id, forwarder });
        info!(conn = %self.id(), %address, handlers = self.state.handler_count, "registered");

        self.spawn_notify(BridgeEventType::Registered, Some(envelope.raw));
    }

    async fn unregister(&mut self, address: &str) {
        if !self.ctx.outbound.evaluate(address, None).matched {
            debug!(conn = %self.id(), %address, "unregister denied");
            self.socket.write_error(ErrorCode::AccessDenied);
            return;
        }

        match self.state.subscriptions.remove(address) {
            Some(subscription) => {
                subscription.forwarder.abort();
                self.ctx.bus.unsubscribe(subscription.id).await;
                self.state.handler_count = self.state.handler_count.saturating_sub(1);
                info!(conn = %self.id(), %address, handlers = self.state.handler_count, "unregistered");
            }
            None => debug!(conn = %self.id(), %address, "unregister of unknown address"),
        }
    }

    async fn forward(&mut self, request: ForwardRequest) {
        let ForwardRequest {
            kind,
            address,
            body,
            headers,
            reply_address,
            awaiting,
        } = request;
        let options = DeliveryOptions {
            headers,
            timeout: Some(self.ctx.options.reply_timeout()),
        };
        let bus = &self.ctx.bus;

        match (kind, reply_address) {
            (EnvelopeKind::Publish, _) => bus.publish(&address, body, options).await,
            (_, None) => match &awaiting {
                Some(original) => bus.reply(original, body, options).await,
                None => bus.send(&address, body, options).await,
            },
            (_, Some(reply_address)) => {
                if self.state.handler_count >= self.ctx.options.max_handlers_per_socket {
                    self.socket.write_error(ErrorCode::MaxHandlersReached);
                    return;
                }
                self.state.handler_count += 1;

                let ctx = Arc::clone(&self.ctx);
                let socket = Arc::clone(&self.socket);
                tokio::spawn(async move {
                    let result = match &awaiting {
                        Some(original) => ctx.bus.reply_and_request(original, body, options).await,
                        None => ctx.bus.request(&address, body, options).await,
                    };
                    socket.post(Command::ReplySettled);
                    match result {
                        Ok(reply) => deliver(&ctx, &socket, &reply_address, reply).await,
                        Err(failure) => {
                            debug!(conn = %socket.id(), %address, "request failed: {failure}");
                            socket.write(&ServerEnvelope::ReplyFailure {
                                address: reply_address,
                                failure_code: failure.code,
                                failure_type: failure.failure_type.as_str().to_string(),
                                message: failure.message,
                            });
                        }
                    }
                });
            }
        }
    }

    fn on_liveness_check(&self) {
        if !is_idle(self.state.last_ping, Instant::now(), self.ctx.options.ping_timeout()) {
            return;
        }

        let ctx = Arc::clone(&self.ctx);
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            match ctx.hooks.dispatch(BridgeEventType::SocketIdle, None, &socket).await {
                HookOutcome::Accepted(_) => {
                    info!(conn = %socket.id(), "no ping within deadline; closing");
                    socket.close_session_expired();
                }
                HookOutcome::Rejected | HookOutcome::Stale => socket.write_error(ErrorCode::Rejected),
                HookOutcome::Failed => {}
            }
        });
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    async fn shutdown(&mut self, error: Option<String>) {
        // Leaves the registry and closes the transport, if not done already.
        self.socket.close();

        if let Some(liveness) = self.state.liveness.take() {
            liveness.abort();
        }

        let subscriptions: Vec<_> = self.state.subscriptions.drain().collect();
        for (address, subscription) in subscriptions {
            subscription.forwarder.abort();
            self.ctx.bus.unsubscribe(subscription.id).await;
            self.ctx
                .hooks
                .dispatch(
                    BridgeEventType::Unregister,
                    Some(json!({"type": "unregister", "address": address})),
                    &self.socket,
                )
                .await;
        }
        self.state.handler_count = 0;

        match error {
            None => {
                info!(conn = %self.id(), "connection closed");
                self.ctx
                    .hooks
                    .dispatch(BridgeEventType::SocketClosed, None, &self.socket)
                    .await;
            }
            Some(message) => {
                warn!(conn = %self.id(), "connection failed: {message}");
                let payload = ServerEnvelope::SocketException {
                    message: Some(message),
                }
                .to_value();
                self.ctx
                    .hooks
                    .dispatch(BridgeEventType::SocketError, Some(payload), &self.socket)
                    .await;
            }
        }
    }
}

// ── Shared steps ──────────────────────────────────────────────────────────────

/// Re-reads an envelope after an interceptor had the chance to rewrite it.
fn reread(original: ClientEnvelope, payload: Option<Value>) -> Result<ClientEnvelope, ProtocolError> {
    match payload {
        Some(payload) if payload != original.raw => ClientEnvelope::with_kind(original.kind, payload),
        _ => Ok(original),
    }
}

/// Checks a `send`/`publish` against the reply table, the inbound rules and
/// the principal's authorities.
async fn check_send(
    ctx: &BridgeContext,
    socket: &BridgeSocket,
    envelope: ClientEnvelope,
) -> Result<ForwardRequest, ErrorCode> {
    if let Some(reply_address) = &envelope.reply_address {
        if reply_address.chars().count() > MAX_REPLY_ADDRESS_LEN {
            return Err(ErrorCode::InvalidReplyAddress);
        }
    }

    let address = envelope.address_or_empty().to_string();
    let awaiting = ctx.replies.consume(&address);

    if awaiting.is_none() {
        let result = ctx.inbound.evaluate(&address, Some(&envelope.body));
        if !result.matched {
            debug!(conn = %socket.id(), %address, "inbound message denied");
            return Err(ErrorCode::AccessDenied);
        }
        if let Some(authority) = &result.required_authority {
            ctx.authorizer
                .authorize(socket.principal().as_ref(), authority)
                .await
                .map_err(|err| {
                    debug!(conn = %socket.id(), %address, "{err}");
                    err.code()
                })?;
        }
    }

    Ok(ForwardRequest {
        kind: envelope.kind,
        address,
        body: envelope.body,
        headers: envelope.headers.unwrap_or_default(),
        reply_address: envelope.reply_address,
        awaiting,
    })
}

/// Moves messages from one subscription to the client, one at a time.
async fn forward_subscription(
    ctx: Arc<BridgeContext>,
    socket: Arc<BridgeSocket>,
    mut subscription: Subscription,
) {
    while let Some(message) = subscription.receiver.recv().await {
        let address = subscription.address.as_str();
        let result = ctx.outbound.evaluate(address, Some(&message.body));
        if !result.matched {
            debug!(conn = %socket.id(), %address, "outbound message withheld by rules");
            continue;
        }
        if let Some(authority) = &result.required_authority {
            if let Err(err) = ctx
                .authorizer
                .authorize(socket.principal().as_ref(), authority)
                .await
            {
                debug!(conn = %socket.id(), %address, "outbound message withheld: {err}");
                continue;
            }
        }
        deliver(&ctx, &socket, address, message).await;
    }
}

/// Delivers one bus message to the client as a `rec` envelope.
///
/// The message's reply address, if any, is tracked first so the client may
/// answer it.  `RECEIVE` is raised with the envelope; a rejection drops it.
async fn deliver(ctx: &BridgeContext, socket: &Arc<BridgeSocket>, address: &str, message: BusMessage) {
    if let Some(reply_address) = &message.reply_address {
        ctx.replies
            .track(reply_address.clone(), message.clone(), ctx.options.reply_timeout());
    }

    let envelope = ServerEnvelope::Receive {
        address: address.to_string(),
        body: message.body,
        headers: Some(message.headers),
        reply_address: message.reply_address,
    }
    .to_value();

    match ctx.hooks.dispatch(BridgeEventType::Receive, Some(envelope), socket).await {
        HookOutcome::Accepted(Some(payload)) => socket.write_value(&payload),
        HookOutcome::Accepted(None) => {}
        _ => debug!(conn = %socket.id(), %address, "delivery dropped by handler"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
