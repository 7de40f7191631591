//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`NodeLinkConfig`] values,
//! and [`TestConfigFile`] when the code under test reads a config from disk.

use std::path::{Path, PathBuf};

use nodelink_config::NodeLinkConfig;
use tempfile::TempDir;

/// Fluent builder for [`NodeLinkConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_path(node.socket_path())
///     .request_timeout_ms(200)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: NodeLinkConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeLinkConfig::default(),
        }
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.node.socket_path = path.as_ref().display().to_string();
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.node.connect_timeout_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.node.request_timeout_ms = ms;
        self
    }

    pub fn response_header_timeout_ms(mut self, ms: u64) -> Self {
        self.config.node.response_header_timeout_ms = ms;
        self
    }

    pub fn public_key(mut self, key: &str) -> Self {
        self.config.identity.public_key = Some(key.to_string());
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> NodeLinkConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A config file in a test-scoped temp directory.
///
/// The directory is deleted when this value is dropped, even on panic.
pub struct TestConfigFile {
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TestConfigFile {
    /// Write `toml_content` to a fresh `nodelink.toml`.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("nodelink.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Serialize `config` to a fresh `nodelink.toml`.
    pub async fn from_config(config: &NodeLinkConfig) -> Self {
        let rendered = toml::to_string_pretty(config).expect("failed to render test config");
        Self::with_toml(&rendered).await
    }

    pub async fn load(&self) -> NodeLinkConfig {
        NodeLinkConfig::load(&self.path)
            .await
            .expect("failed to load test config")
    }
}

