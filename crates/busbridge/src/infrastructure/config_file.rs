//! TOML configuration loading.
//!
//! The bridge reads its rule lists, limits and principals from an optional
//! TOML file (see `domain::config` for the layout).  A missing file is not an
//! error: the bridge starts with the defaults, which deny all traffic.
//!
//! # What is TOML? (for beginners)
//!
//! TOML is a configuration format that looks like INI files with real data
//! types.  `[bridge]` opens a table, `[[bridge.inbound]]` appends one entry
//! to an array of tables.  `serde` turns the text into [`BridgeConfig`]
//! automatically via `#[derive(Deserialize)]`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::domain::config::BridgeConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value parsed but cannot be used.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

/// Parses configuration text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed or a field has the
/// wrong type, and [`ConfigError::Invalid`] if [`validate_config`] refuses it.
pub fn parse_config(content: &str) -> Result<BridgeConfig, ConfigError> {
    let config: BridgeConfig = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks the values serde cannot: both timeouts drive timers and must be
/// at least one millisecond.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first offending field.
pub fn validate_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    if config.bridge.ping_timeout_ms == 0 {
        return Err(ConfigError::Invalid {
            field: "bridge.ping_timeout_ms",
            reason: "must be at least 1",
        });
    }
    if config.bridge.reply_timeout_ms == 0 {
        return Err(ConfigError::Invalid {
            field: "bridge.reply_timeout_ms",
            reason: "must be at least 1",
        });
    }
    Ok(())
}

/// Loads [`BridgeConfig`] from `path`, returning the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg = parse_config(&content)?;
            info!(
                path = %path.display(),
                inbound = cfg.bridge.inbound.len(),
                outbound = cfg.bridge.outbound.len(),
                principals = cfg.principals.len(),
                "configuration loaded"
            );
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no configuration file; using defaults");
            Ok(BridgeConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("busbridge-{}-{name}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        // Arrange
        let path = temp_path("missing.toml");

        // Act
        let cfg = load_config(&path).unwrap();

        // Assert
        assert_eq!(cfg, BridgeConfig::default());
    }

    #[test]
    fn test_existing_file_is_parsed() {
        // Arrange
        let path = temp_path("bridge.toml");
        std::fs::write(
            &path,
            "[bridge]\nmax_address_length = 64\n\n[[bridge.inbound]]\naddress = \"echo\"\n",
        )
        .unwrap();

        // Act
        let cfg = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        // Assert
        assert_eq!(cfg.bridge.max_address_length, 64);
        assert_eq!(cfg.bridge.inbound.len(), 1);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let path = temp_path("broken.toml");
        std::fs::write(&path, "[bridge\nmax_address_length = ").unwrap();

        let result = load_config(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_wrong_field_type_is_a_parse_error() {
        let err = parse_config("[bridge]\nping_timeout_ms = \"soon\"\n").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse config TOML"));
    }

    #[test]
    fn test_zero_ping_timeout_is_rejected() {
        // Arrange
        let path = temp_path("zero-ping.toml");
        std::fs::write(&path, "[bridge]\nping_timeout_ms = 0\n").unwrap();

        // Act
        let result = load_config(&path);
        std::fs::remove_file(&path).unwrap();

        // Assert
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "bridge.ping_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_zero_reply_timeout_is_rejected() {
        let err = parse_config("[bridge]\nreply_timeout_ms = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for bridge.reply_timeout_ms: must be at least 1"
        );
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(validate_config(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_directory_path_is_an_io_error() {
        let err = load_config(&std::env::temp_dir()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
