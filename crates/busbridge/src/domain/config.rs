//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is read from an optional TOML file, then individual values are
//! overridden from CLI arguments (see `main.rs`).
//!
//! # Layout
//!
//! ```toml
//! [server]
//! ws_bind_addr = "0.0.0.0:7070"
//!
//! [bridge]
//! max_address_length = 200
//! max_handlers_per_socket = 1000
//! ping_timeout_ms = 10000
//! reply_timeout_ms = 30000
//!
//! [[bridge.inbound]]
//! address = "echo"
//!
//! [[bridge.outbound]]
//! address_regex = "news\\..+"
//! required_authority = "news:read"
//!
//! [[principals]]
//! name = "alice"
//! token = "s3cret"
//! authorities = ["news:read"]
//! ```
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration.  Note that the default rule lists are *empty*, which means
//! the bridge denies everything until rules are configured.

use std::net::SocketAddr;
use std::time::Duration;

use busbridge_core::{Authority, PermissionRule};
use serde::{Deserialize, Serialize};

/// All runtime configuration for the bridge process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeOptions,
    /// Statically configured identities for bearer-token authentication.
    #[serde(default)]
    pub principals: Vec<PrincipalEntry>,
}

/// Network settings for the WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port the WebSocket server binds to.
    #[serde(default = "default_ws_bind_addr")]
    pub ws_bind_addr: SocketAddr,
}

/// Engine settings: rule lists, quotas and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeOptions {
    /// Rules for client → bus traffic (`send`, `publish`).
    #[serde(default)]
    pub inbound: Vec<PermissionRule>,

    /// Rules for bus → client traffic (`register`, `unregister`, deliveries).
    #[serde(default)]
    pub outbound: Vec<PermissionRule>,

    /// Longest address a client may register.
    #[serde(default = "default_max_address_length")]
    pub max_address_length: usize,

    /// Most subscriptions plus outstanding replies one connection may hold.
    #[serde(default = "default_max_handlers_per_socket")]
    pub max_handlers_per_socket: usize,

    /// A client must ping at least this often or the connection is closed.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// How long a request waits for its reply, and how long a delivered
    /// message's reply address stays open for the client's answer.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

impl BridgeOptions {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Replaces the inbound rule list.
    pub fn with_inbound(mut self, rules: Vec<PermissionRule>) -> Self {
        self.inbound = rules;
        self
    }

    /// Replaces the outbound rule list.
    pub fn with_outbound(mut self, rules: Vec<PermissionRule>) -> Self {
        self.outbound = rules;
        self
    }
}

/// A bearer token and the identity it authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalEntry {
    pub name: String,
    pub token: String,
    /// Authorities loaded for this principal on demand.
    #[serde(default)]
    pub authorities: Vec<Authority>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_ws_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7070))
}
fn default_max_address_length() -> usize {
    200
}
fn default_max_handlers_per_socket() -> usize {
    1000
}
fn default_ping_timeout_ms() -> u64 {
    10_000
}
fn default_reply_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: default_ws_bind_addr(),
        }
    }
}

impl Default for BridgeOptions {
    /// | Field                   | Default  |
    /// |-------------------------|----------|
    /// | inbound / outbound      | empty    |
    /// | max_address_length      | 200      |
    /// | max_handlers_per_socket | 1000     |
    /// | ping_timeout            | 10 s     |
    /// | reply_timeout           | 30 s     |
    fn default() -> Self {
        Self {
            inbound: Vec::new(),
            outbound: Vec::new(),
            max_address_length: default_max_address_length(),
            max_handlers_per_socket: default_max_handlers_per_socket(),
            ping_timeout_ms: default_ping_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ws_port_is_7070() {
        // Arrange / Act
        let cfg = BridgeConfig::default();
        // Assert
        assert_eq!(cfg.server.ws_bind_addr.port(), 7070);
    }

    #[test]
    fn test_default_rule_lists_are_empty() {
        // Empty lists mean default deny.
        let cfg = BridgeOptions::default();
        assert!(cfg.inbound.is_empty());
        assert!(cfg.outbound.is_empty());
    }

    #[test]
    fn test_default_limits() {
        let cfg = BridgeOptions::default();
        assert_eq!(cfg.max_address_length, 200);
        assert_eq!(cfg.max_handlers_per_socket, 1000);
    }

    #[test]
    fn test_default_timeouts() {
        let cfg = BridgeOptions::default();
        assert_eq!(cfg.ping_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.reply_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_toml_is_default_config() {
        let cfg: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, BridgeConfig::default());
    }

    #[test]
    fn test_full_toml_parses() {
        // Arrange
        let text = r#"
[server]
ws_bind_addr = "127.0.0.1:9000"

[bridge]
max_handlers_per_socket = 3
ping_timeout_ms = 500

[[bridge.inbound]]
address = "echo"

[[bridge.outbound]]
address_regex = "news\\..+"
required_authority = "news:read"

[[principals]]
name = "alice"
token = "t0k"
authorities = ["news:read"]
"#;

        // Act
        let cfg: BridgeConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.server.ws_bind_addr.port(), 9000);
        assert_eq!(cfg.bridge.max_handlers_per_socket, 3);
        assert_eq!(cfg.bridge.ping_timeout(), Duration::from_millis(500));
        // Unspecified fields keep their defaults
        assert_eq!(cfg.bridge.max_address_length, 200);
        assert_eq!(cfg.bridge.inbound, vec![PermissionRule::address("echo")]);
        assert_eq!(
            cfg.bridge.outbound[0].required_authority,
            Some(Authority::new("news:read"))
        );
        assert_eq!(cfg.principals[0].name, "alice");
        assert_eq!(cfg.principals[0].authorities, vec![Authority::new("news:read")]);
    }

    #[test]
    fn test_builder_helpers_replace_rule_lists() {
        let opts = BridgeOptions::default()
            .with_inbound(vec![PermissionRule::default()])
            .with_outbound(vec![PermissionRule::address("x")]);
        assert_eq!(opts.inbound.len(), 1);
        assert_eq!(opts.outbound[0].address.as_deref(), Some("x"));
    }
}
