//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from clients.
//! 3. Upgrading each connection to a WebSocket session, capturing the bearer
//!    token from the `Authorization` header or the `?token=` query parameter.
//! 4. Handing the session to the [`BridgeEngine`] as a [`ClientSocket`].
//! 5. Running two concurrent loops per session:
//!    - **Reader**: WebSocket frames → `engine.on_frame`.
//!    - **Writer**: frames queued by the engine → WebSocket.
//! 6. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Backpressure
//!
//! [`ClientSocket::pause`] stops the reader from pulling the next frame until
//! [`ClientSocket::resume`] is called; TCP flow control then slows the
//! client down.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use busbridge_core::Principal;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::engine::BridgeEngine;
use crate::application::session::{ClientSocket, ConnectionId};
use crate::domain::config::BridgeConfig;
use crate::infrastructure::static_auth::StaticPrincipals;

/// How long a finished reader waits for the writer to flush.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the main WebSocket accept loop until `running` is set to `false`.
///
/// Each accepted connection is handed off to a dedicated Tokio task so that
/// one slow client never blocks others.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    config: BridgeConfig,
    engine: BridgeEngine,
    principals: Arc<StaticPrincipals>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.ws_bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;

    info!("busbridge listening on {bind_addr}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the `running` flag is re-checked even when idle.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let engine = engine.clone();
                let principals = Arc::clone(&principals);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, engine, principals).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Transport adapter ─────────────────────────────────────────────────────────

/// Work queued for the writer task.
#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// The engine-facing half of one WebSocket session.
struct WsClientSocket {
    peer_addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    principal: Option<Principal>,
    paused: AtomicBool,
    resumed: Notify,
}

impl WsClientSocket {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl ClientSocket for WsClientSocket {
    fn write(&self, frame: String) {
        if self.outgoing.send(Outgoing::Text(frame)).is_err() {
            debug!("session {}: writer gone; frame dropped", self.peer_addr);
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Outgoing::Close(code, reason.to_string()));
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resumed.notify_one();
    }

    fn principal(&self) -> Option<Principal> {
        self.principal.clone()
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Wraps [`run_session`] and logs the outcome.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: BridgeEngine,
    principals: Arc<StaticPrincipals>,
) {
    match run_session(stream, peer_addr, engine, principals).await {
        Ok(()) => debug!("session {peer_addr} ended"),
        Err(e) => warn!("session {peer_addr} ended with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of a single WebSocket session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: BridgeEngine,
    principals: Arc<StaticPrincipals>,
) -> anyhow::Result<()> {
    // ── Step 1: Handshake, capturing the bearer token ─────────────────────────
    let mut token = None;
    let ws_stream = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            token = bearer_token(request);
            Ok(response)
        },
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let principal = token.as_deref().and_then(|t| principals.authenticate(t));
    if token.is_some() && principal.is_none() {
        debug!("session {peer_addr}: unknown token; continuing anonymously");
    }

    // ── Step 2: Writer task ───────────────────────────────────────────────────
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();

    let mut writer = tokio::spawn(async move {
        while let Some(item) = out_rx.recv().await {
            match item {
                Outgoing::Text(text) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                        debug!("session {peer_addr}: write failed: {e}");
                        break;
                    }
                }
                Outgoing::Close(code, reason) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    // ── Step 3: Hand the session to the engine ────────────────────────────────
    let socket = Arc::new(WsClientSocket {
        peer_addr,
        outgoing: out_tx,
        principal,
        paused: AtomicBool::new(false),
        resumed: Notify::new(),
    });

    let client: Arc<dyn ClientSocket> = socket.clone();
    let id = match engine.on_connect(client).await {
        Ok(id) => id,
        Err(e) => {
            info!("session {peer_addr}: {e}");
            // The engine already queued the close frame.
            let _ = writer.await;
            return Ok(());
        }
    };
    info!("session {peer_addr} is connection {id}");

    // ── Step 4: Run until either side finishes ────────────────────────────────
    //
    // The reader ends when the client closes or the transport fails.  The
    // writer ends when the engine closed the session (idle expiry, a handler
    // closing the socket) or a write failed.  A half-open client may never
    // send another frame.
    let reader_finished = tokio::select! {
        _ = read_frames(&mut ws_rx, &socket, &engine, id) => true,
        _ = &mut writer => false,
    };

    if reader_finished {
        debug!("session {peer_addr}: reader ended");
        // Give the writer a moment to flush the close frame queued on shutdown.
        if timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
    } else {
        debug!("session {peer_addr}: writer ended");
        // No-op if the engine closed the session itself.
        engine.on_connection_closed(id);
    }

    // Dropping the read half here releases the TCP socket.
    Ok(())
}

/// Feeds client frames to the engine until the stream ends or fails.
async fn read_frames<S>(ws_rx: &mut S, socket: &WsClientSocket, engine: &BridgeEngine, id: ConnectionId)
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        if socket.is_paused() {
            socket.resumed.notified().await;
            continue;
        }

        let frame = match ws_rx.next().await {
            Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
            Some(Ok(WsMessage::Binary(bytes))) => bytes,
            Some(Ok(WsMessage::Close(_))) | None => {
                engine.on_connection_closed(id);
                return;
            }
            // Ping/Pong are answered by tungstenite itself.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                engine.on_connection_error(id, e.to_string());
                return;
            }
        };

        if engine.on_frame(id, frame).is_err() {
            // The engine closed the connection.
            return;
        }
    }
}

/// Extracts a bearer token from the upgrade request.
///
/// `Authorization: Bearer <token>` wins over a `token` query parameter.
fn bearer_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    from_header.or_else(|| {
        request.uri().query().and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "token")
                .map(|(_, value)| value.to_string())
        })
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::BridgeOptions;
    use crate::infrastructure::local_bus::LocalBus;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_bearer_token_from_header() {
        let req = request("/bus", Some("Bearer abc123"));
        assert_eq!(bearer_token(&req).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_bearer_token_from_query() {
        let req = request("/bus?x=1&token=q-tok", None);
        assert_eq!(bearer_token(&req).as_deref(), Some("q-tok"));
    }

    #[test]
    fn test_header_wins_over_query() {
        let req = request("/bus?token=from-query", Some("Bearer from-header"));
        assert_eq!(bearer_token(&req).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let req = request("/bus", Some("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn test_ws_socket_queues_frames_and_close() {
        // Arrange
        let (tx, mut rx) = mpsc::unbounded_channel();
        let socket = WsClientSocket {
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 1)),
            outgoing: tx,
            principal: Some(Principal::new("alice")),
            paused: AtomicBool::new(false),
            resumed: Notify::new(),
        };

        // Act
        socket.write("hello".to_string());
        socket.close(1001, "Session expired");

        // Assert
        assert!(matches!(rx.try_recv(), Ok(Outgoing::Text(t)) if t == "hello"));
        assert!(matches!(rx.try_recv(), Ok(Outgoing::Close(1001, r)) if r == "Session expired"));
        assert_eq!(socket.principal().map(|p| p.name().to_string()), Some("alice".into()));
    }

    #[tokio::test]
    async fn test_server_side_close_ends_session_with_silent_peer() {
        // Arrange: a short liveness deadline and a client that never sends
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let options = BridgeOptions {
            ping_timeout_ms: 50,
            ..BridgeOptions::default()
        };
        let engine = BridgeEngine::new(options, Arc::new(LocalBus::new()));
        let principals = Arc::new(StaticPrincipals::default());

        let server = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            run_session(stream, peer_addr, engine, principals).await
        });
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/bus"))
            .await
            .unwrap();

        // Act: wait for the idle close without reading or writing anything
        let finished = timeout(Duration::from_secs(5), server).await;

        // Assert: the session task ended on its own
        assert!(matches!(finished, Ok(Ok(Ok(())))));
        match client.next().await {
            Some(Ok(WsMessage::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason, "Session expired");
            }
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_pause_and_resume_toggle_flag() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let socket = WsClientSocket {
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 1)),
            outgoing: tx,
            principal: None,
            paused: AtomicBool::new(false),
            resumed: Notify::new(),
        };

        socket.pause();
        assert!(socket.is_paused());
        socket.resume();
        assert!(!socket.is_paused());
    }
}
