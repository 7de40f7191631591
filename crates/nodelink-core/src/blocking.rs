//! Blocking node client.
//!
//! Wraps [`NodeClient`] with a private current-thread runtime so callers
//! without an async context can use the node API. Each call blocks the
//! calling thread until the exchange completes or a timeout fires.
//!
//! Must not be used from inside a tokio runtime; blocking there panics.

use std::path::{Path, PathBuf};

use hyper::body::Bytes;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::client::{NodeClient, NodeClientError};
use crate::transport::TransportConfig;

/// Synchronous counterpart of [`NodeClient`].
#[derive(Debug)]
pub struct BlockingNodeClient {
    inner: NodeClient,
    runtime: Runtime,
}

impl BlockingNodeClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Result<Self, NodeClientError> {
        Self::with_config(socket_path, TransportConfig::default())
    }

    pub fn with_config(
        socket_path: impl Into<PathBuf>,
        config: TransportConfig,
    ) -> Result<Self, NodeClientError> {
        let inner = NodeClient::with_config(socket_path, config)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(NodeClientError::Runtime)?;
        Ok(Self { inner, runtime })
    }

    pub fn socket_path(&self) -> &Path {
        self.inner.socket_path()
    }

    /// See [`NodeClient::upcheck`].
    pub fn upcheck(&self) -> Result<(), NodeClientError> {
        self.runtime.block_on(self.inner.upcheck())
    }

    /// See [`NodeClient::send_payload`].
    pub fn send_payload<S: AsRef<str>>(
        &self,
        payload: &[u8],
        sender: Option<&str>,
        recipients: &[S],
    ) -> Result<Vec<u8>, NodeClientError> {
        self.runtime
            .block_on(self.inner.send_payload(payload, sender, recipients))
    }

    /// See [`NodeClient::receive_payload`].
    pub fn receive_payload(&self, key: &[u8]) -> Result<Vec<u8>, NodeClientError> {
        self.runtime.block_on(self.inner.receive_payload(key))
    }

    /// See [`NodeClient::post_json`].
    pub fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<Bytes, NodeClientError> {
        self.runtime.block_on(self.inner.post_json(path, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ErrorKind;

    #[test]
    fn test_blocking_upcheck_without_listener() {
        let client = BlockingNodeClient::new("/tmp/nodelink-blocking-missing.ipc").unwrap();
        let err = client.upcheck().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn test_blocking_rejects_empty_path() {
        let err = BlockingNodeClient::new("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
