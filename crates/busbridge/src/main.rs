//! busbridge: entry point.
//!
//! This binary accepts WebSocket connections and bridges them onto an
//! in-process event bus.  Clients speak small JSON envelopes (`send`,
//! `publish`, `register`, `unregister`, `ping`); every envelope is checked
//! against the configured permission rules before it reaches the bus, and
//! every bus message is checked again before it reaches a client.
//!
//! # Usage
//!
//! ```text
//! busbridge [OPTIONS]
//!
//! Options:
//!   --config         <PATH>   TOML configuration file [default: busbridge.toml]
//!   --ws-port        <PORT>   WebSocket listener port
//!   --ws-bind        <IP>     WebSocket bind address
//!   --ping-timeout   <MS>     Client liveness deadline in milliseconds
//!   --reply-timeout  <MS>     Request/reply timeout in milliseconds
//!   --echo-address   <ADDR>   Install a responder that echoes requests
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                  | Description                       |
//! |---------------------------|-----------------------------------|
//! | `BUSBRIDGE_CONFIG`        | Configuration file path           |
//! | `BUSBRIDGE_WS_PORT`       | WebSocket listener port           |
//! | `BUSBRIDGE_WS_BIND`       | WebSocket bind address            |
//! | `BUSBRIDGE_PING_TIMEOUT`  | Liveness deadline (ms)            |
//! | `BUSBRIDGE_REPLY_TIMEOUT` | Request/reply timeout (ms)        |
//!
//! Values given on the command line (or through the environment) override
//! the configuration file.
//!
//! # Architecture overview
//!
//! ```text
//! Client  (JSON envelopes over WebSocket)
//!       ↕
//! busbridge  ← this process
//!   domain/          BridgeConfig, bridge event kinds
//!   application/     BridgeEngine, connection actors, rules, replies
//!   infrastructure/
//!     ws_server/     Accept WebSocket connections
//!     local_bus/     In-process event bus
//!       ↕
//! Bus consumers (in-process)
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use busbridge::application::{BridgeEngine, DeliveryOptions, EventBus};
use busbridge::domain::BridgeConfig;
use busbridge::infrastructure::{load_config, run_server, validate_config, LocalBus, StaticPrincipals};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-event-bus bridge.
///
/// The `#[derive(Parser)]` macro from `clap` generates the argument parser
/// automatically from the struct fields and their `#[arg(...)]` attributes.
#[derive(Debug, Parser)]
#[command(
    name = "busbridge",
    about = "Bridges WebSocket clients onto an event bus with permission rules",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "busbridge.toml", env = "BUSBRIDGE_CONFIG")]
    config: PathBuf,

    /// TCP port for the WebSocket server to listen on.
    #[arg(long, env = "BUSBRIDGE_WS_PORT")]
    ws_port: Option<u16>,

    /// IP address to bind the WebSocket server to.
    ///
    /// Use `0.0.0.0` to accept connections from any interface, or
    /// `127.0.0.1` to accept only local connections.
    #[arg(long, env = "BUSBRIDGE_WS_BIND")]
    ws_bind: Option<String>,

    /// A client that does not ping within this many milliseconds is
    /// disconnected.
    #[arg(long, env = "BUSBRIDGE_PING_TIMEOUT", value_parser = clap::value_parser!(u64).range(1..))]
    ping_timeout: Option<u64>,

    /// How long a request waits for its reply, in milliseconds.
    #[arg(long, env = "BUSBRIDGE_REPLY_TIMEOUT", value_parser = clap::value_parser!(u64).range(1..))]
    reply_timeout: Option<u64>,

    /// Subscribes a responder on this address that answers every request
    /// with the request body.  Handy for trying the bridge out.
    #[arg(long)]
    echo_address: Option<String>,
}

impl Cli {
    /// Applies the command-line overrides on top of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` is not a valid IP address, or if the
    /// merged configuration fails [`validate_config`].
    fn apply_to(&self, mut config: BridgeConfig) -> anyhow::Result<BridgeConfig> {
        if let Some(bind) = &self.ws_bind {
            let ip: IpAddr = bind
                .parse()
                .with_context(|| format!("invalid WebSocket bind address: '{bind}'"))?;
            config.server.ws_bind_addr = SocketAddr::new(ip, config.server.ws_bind_addr.port());
        }
        if let Some(port) = self.ws_port {
            config.server.ws_bind_addr.set_port(port);
        }
        if let Some(ms) = self.ping_timeout {
            config.bridge.ping_timeout_ms = ms;
        }
        if let Some(ms) = self.reply_timeout {
            config.bridge.reply_timeout_ms = ms;
        }
        validate_config(&config)?;
        Ok(config)
    }
}

/// Answers every request on `address` with its own body.
async fn spawn_echo_responder(bus: Arc<LocalBus>, address: String) {
    let mut subscription = bus.subscribe(&address).await;
    info!(%address, "echo responder installed");
    tokio::spawn(async move {
        while let Some(message) = subscription.receiver.recv().await {
            let body = message.body.clone();
            let options = DeliveryOptions {
                headers: message.headers.clone(),
                timeout: None,
            };
            bus.reply(&message, body, options).await;
        }
    });
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised; the level comes from `RUST_LOG`.
/// 2. CLI arguments are parsed and the configuration file is loaded.
/// 3. The in-process bus, the principal table and the engine are built.
/// 4. A Ctrl+C handler clears a shared `AtomicBool` on shutdown.
/// 5. [`run_server`] accepts connections until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let cli = Cli::parse();
    let file_config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let config = cli.apply_to(file_config)?;

    info!(
        "busbridge starting: ws={}, inbound rules={}, outbound rules={}",
        config.server.ws_bind_addr,
        config.bridge.inbound.len(),
        config.bridge.outbound.len()
    );

    // ── Bus, principals, engine ───────────────────────────────────────────────
    let bus = Arc::new(LocalBus::new());
    if let Some(address) = &cli.echo_address {
        spawn_echo_responder(Arc::clone(&bus), address.clone()).await;
    }

    let principals = Arc::new(StaticPrincipals::new(&config.principals));
    let engine = BridgeEngine::builder(config.bridge.clone(), bus)
        .authorization_provider(principals.clone())
        .build();

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    run_server(config, engine, principals, running).await?;

    info!("busbridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
