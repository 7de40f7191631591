#![deny(unsafe_code)]

//! Configuration loading and validation for nodelink.
//!
//! Loads TOML configuration files and validates them. [`NodeLinkConfig`] is
//! the central configuration structure; it converts into the core crate's
//! [`TransportConfig`] so the client never reads files itself.
//!
//! ## TOML Example
//!
//! ```toml
//! [node]
//! socket_path = "/run/node/tm.ipc"
//! connect_timeout_ms = 1000
//! request_timeout_ms = 5000
//! response_header_timeout_ms = 5000
//!
//! [identity]
//! public_key = "TFjDjZqsAV9sc2Sf7noQ4swb90MOLNYA1gTKwmTDlRY="
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use nodelink_core::TransportConfig;
use serde::{Deserialize, Serialize};

/// Socket path used when neither the config file nor the command line names one.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/node.ipc";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeLinkConfig {
    /// Node socket and transport timeouts.
    #[serde(default)]
    pub node: NodeConfig,

    /// Local participant identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the node listens and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Filesystem path of the node's Unix socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Connection establishment timeout, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whole-exchange timeout, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Response header wait timeout, in milliseconds.
    #[serde(default = "default_response_header_timeout_ms")]
    pub response_header_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            response_header_timeout_ms: default_response_header_timeout_ms(),
        }
    }
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_response_header_timeout_ms() -> u64 {
    5_000
}

/// The local participant.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Base64 public key used as the default sender. When unset, sends omit
    /// the sender and the node picks its own default.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeLinkConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: NodeLinkConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.socket_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "node.socket_path must not be empty".to_string(),
            ));
        }
        let timeouts = [
            ("connect_timeout_ms", self.node.connect_timeout_ms),
            ("request_timeout_ms", self.node.request_timeout_ms),
            ("response_header_timeout_ms", self.node.response_header_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "node.{name} must be non-zero"
                )));
            }
        }
        if let Some(key) = &self.identity.public_key {
            if key.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "identity.public_key must not be empty when set".to_string(),
                ));
            }
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(&self.node.socket_path)
    }

    /// Transport timeouts derived from the `[node]` section.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.node.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.node.request_timeout_ms),
            response_header_timeout: Duration::from_millis(self.node.response_header_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NodeLinkConfig::default();
        assert_eq!(config.node.socket_path, DEFAULT_SOCKET_PATH);
        assert_eq!(config.node.connect_timeout_ms, 1_000);
        assert!(config.identity.public_key.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = NodeLinkConfig::parse("").unwrap();
        assert_eq!(config.node.request_timeout_ms, 5_000);
        assert_eq!(config.transport_config(), TransportConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [node]
            socket_path = "/run/node/c1.ipc"
            connect_timeout_ms = 250
            request_timeout_ms = 2000
            response_header_timeout_ms = 1500

            [identity]
            public_key = "TFjDjZqsAV9sc2Sf7noQ4swb90MOLNYA1gTKwmTDlRY="

            [logging]
            level = "debug"
        "#;
        let config = NodeLinkConfig::parse(toml).unwrap();
        assert_eq!(config.socket_path(), PathBuf::from("/run/node/c1.ipc"));
        assert_eq!(
            config.identity.public_key.as_deref(),
            Some("TFjDjZqsAV9sc2Sf7noQ4swb90MOLNYA1gTKwmTDlRY=")
        );
        assert_eq!(config.logging.level, "debug");

        let transport = config.transport_config();
        assert_eq!(transport.connect_timeout, Duration::from_millis(250));
        assert_eq!(transport.request_timeout, Duration::from_millis(2000));
        assert_eq!(transport.response_header_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_validation_rejects_empty_socket_path() {
        let toml = r#"
            [node]
            socket_path = ""
        "#;
        let result = NodeLinkConfig::parse(toml);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let toml = r#"
            [node]
            response_header_timeout_ms = 0
        "#;
        let err = NodeLinkConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("response_header_timeout_ms"));
    }

    #[test]
    fn test_validation_rejects_blank_public_key() {
        let toml = r#"
            [identity]
            public_key = "  "
        "#;
        assert!(NodeLinkConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_log_level() {
        let toml = r#"
            [logging]
            level = "chatty"
        "#;
        assert!(NodeLinkConfig::parse(toml).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        let result = NodeLinkConfig::parse("[node");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodelink.toml");
        tokio::fs::write(&path, "[node]\nsocket_path = \"/tmp/c2.ipc\"\n")
            .await
            .unwrap();

        let config = NodeLinkConfig::load(&path).await.unwrap();
        assert_eq!(config.node.socket_path, "/tmp/c2.ipc");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = NodeLinkConfig::load(Path::new("/nonexistent/nodelink.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = NodeLinkConfig::default();
        config.identity.public_key = Some("AAAA".to_string());
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed = NodeLinkConfig::parse(&rendered).unwrap();
        assert_eq!(parsed.identity.public_key.as_deref(), Some("AAAA"));
    }
}
