//! Socket-backed HTTP transport.
//!
//! Requests are addressed to a synthetic endpoint (`http+unix://c/...`). The
//! transport looks the host label up in its location table and dials the
//! registered [`Dialer`] instead of resolving the host over DNS. The request
//! is then rewritten to origin form and sent with `hyper` over the dialed
//! stream.
//!
//! Three timeouts bound every exchange:
//!
//! | Phase            | Default | Enforced by                          |
//! |------------------|---------|--------------------------------------|
//! | connect          | 1s      | [`Transport::send`]                  |
//! | response headers | 5s      | [`Transport::send`]                  |
//! | full request     | 5s      | [`Transport::within_deadline`]       |

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, warn};

use crate::BoxFuture;

/// Scheme of the synthetic endpoint.
pub const NODE_SCHEME: &str = "http+unix";

/// Host label of the synthetic endpoint. Carries no addressing meaning; it
/// only selects a registered location.
pub const NODE_HOST: &str = "c";

/// Errors raised while moving a request over the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket path must not be empty")]
    EmptySocketPath,

    #[error("unsupported scheme {0:?}, expected {NODE_SCHEME:?}")]
    UnsupportedScheme(String),

    #[error("no location registered for host {0:?}")]
    UnknownLocation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to connect to {target}: {source}")]
    Dial { target: String, source: io::Error },

    #[error("timed out after {timeout:?} connecting to {target}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("timed out after {0:?} waiting for response headers")]
    HeaderTimeout(Duration),

    #[error("request did not complete within {0:?}")]
    RequestTimeout(Duration),

    #[error("request failed: {0}")]
    Http(#[source] hyper::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),
}

/// A bidirectional byte stream an HTTP/1.1 connection can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// Strategy for opening a connection to a registered location.
///
/// Returns a boxed future so the transport can hold dialers as trait objects.
pub trait Dialer: fmt::Debug + Send + Sync {
    /// Open a fresh connection.
    fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn Connection>>>;

    /// Human-readable description of the dial target, for errors and logs.
    fn target(&self) -> String;
}

/// Dials a Unix domain socket at a filesystem path.
#[derive(Debug, Clone)]
pub struct UnixDialer {
    path: PathBuf,
}

impl UnixDialer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Dialer for UnixDialer {
    fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn Connection>>> {
        Box::pin(async move {
            let stream = UnixStream::connect(&self.path).await?;
            Ok(Box::new(stream) as Box<dyn Connection>)
        })
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// Dials a TCP `host:port` address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn Connection>>> {
        Box::pin(async move {
            let stream = TcpStream::connect(self.addr.as_str()).await?;
            Ok(Box::new(stream) as Box<dyn Connection>)
        })
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}

/// Per-phase timeouts for a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Upper bound on the whole exchange, body included.
    pub request_timeout: Duration,
    /// Upper bound on waiting for response headers once the request is written.
    pub response_header_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            response_header_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP transport that routes synthetic hosts to registered dialers.
///
/// One connection is dialed per request; nothing is pooled. The transport is
/// immutable once built and can be shared across concurrent calls.
#[derive(Debug, Clone)]
pub struct Transport {
    config: TransportConfig,
    locations: HashMap<String, Arc<dyn Dialer>>,
}

impl Transport {
    /// Create a transport with no registered locations.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            locations: HashMap::new(),
        }
    }

    /// Build a transport that routes [`NODE_HOST`] to the Unix socket at
    /// `socket_path`.
    ///
    /// The path is not checked for existence; a missing socket surfaces as a
    /// [`TransportError::Dial`] on the first request.
    pub fn unix(
        socket_path: impl AsRef<Path>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let socket_path = socket_path.as_ref();
        if socket_path.as_os_str().is_empty() {
            return Err(TransportError::EmptySocketPath);
        }
        let mut transport = Self::new(config);
        transport.register_location(NODE_HOST, UnixDialer::new(socket_path));
        Ok(transport)
    }

    /// Route requests for `host` to `dialer`. Replaces any earlier
    /// registration for the same host.
    pub fn register_location(&mut self, host: impl Into<String>, dialer: impl Dialer + 'static) {
        self.locations.insert(host.into(), Arc::new(dialer));
    }

    /// Whether requests for `host` have a registered dialer.
    pub fn routes(&self, host: &str) -> bool {
        self.locations.contains_key(host)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Run `fut` under the full-request timeout.
    pub async fn within_deadline<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<TransportError>,
    {
        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::RequestTimeout(limit).into()),
        }
    }

    /// Send a request addressed to a synthetic endpoint and return the
    /// response once its headers arrive. The body is left unread.
    pub async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, TransportError> {
        let (mut parts, body) = request.into_parts();
        let dialer = self.resolve(&parts.uri)?;
        let host_value = HeaderValue::from_str(parts.uri.host().unwrap_or_default())
            .map_err(|e| TransportError::InvalidRequest(format!("bad host label: {e}")))?;

        let origin = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .parse::<Uri>()
            .map_err(|e| TransportError::InvalidRequest(format!("bad request path: {e}")))?;
        parts.uri = origin;
        parts.headers.insert(HOST, host_value);
        let request = Request::from_parts(parts, body);

        let target = dialer.target();
        debug!(method = %request.method(), path = %request.uri(), %target, "dialing node");

        let stream = tokio::time::timeout(self.config.connect_timeout, dialer.dial())
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                target: target.clone(),
                timeout: self.config.connect_timeout,
            })?
            .map_err(|source| TransportError::Dial {
                target: target.clone(),
                source,
            })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(TransportError::Handshake)?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(error = %e, "node connection error");
            }
        });

        let response = tokio::time::timeout(
            self.config.response_header_timeout,
            sender.send_request(request),
        )
        .await
        .map_err(|_| TransportError::HeaderTimeout(self.config.response_header_timeout))?
        .map_err(TransportError::Http)?;

        debug!(status = %response.status(), %target, "node responded");
        Ok(response)
    }

    fn resolve(&self, uri: &Uri) -> Result<Arc<dyn Dialer>, TransportError> {
        let scheme = uri.scheme_str().unwrap_or_default();
        if scheme != NODE_SCHEME {
            return Err(TransportError::UnsupportedScheme(scheme.to_string()));
        }
        let host = uri.host().unwrap_or_default();
        self.locations
            .get(host)
            .cloned()
            .ok_or_else(|| TransportError::UnknownLocation(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UnixListener};
    use tokio::sync::oneshot;

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::get(uri).body(Full::new(Bytes::new())).unwrap()
    }

    /// Read one request head, answer 200 with an empty body, and hand the
    /// head back to the test.
    async fn answer_once<S>(mut stream: S, head_tx: oneshot::Sender<String>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        let _ = head_tx.send(String::from_utf8_lossy(&buf).into_owned());
    }

    #[derive(Debug)]
    struct StallingDialer;

    impl Dialer for StallingDialer {
        fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn Connection>>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(io::Error::other("unreachable"))
            })
        }

        fn target(&self) -> String {
            "stalling".to_string()
        }
    }

    #[test]
    fn test_default_timeouts() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.response_header_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unix_rejects_empty_path() {
        let result = Transport::unix("", TransportConfig::default());
        assert!(matches!(result, Err(TransportError::EmptySocketPath)));
    }

    #[test]
    fn test_unix_does_not_touch_filesystem() {
        let transport = Transport::unix("/nonexistent/node.ipc", TransportConfig::default());
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn test_missing_socket_is_dial_error() {
        let transport =
            Transport::unix("/tmp/nodelink-missing-socket.ipc", TransportConfig::default())
                .unwrap();
        let result = transport.send(get("http+unix://c/upcheck")).await;
        assert!(matches!(result, Err(TransportError::Dial { .. })));
    }

    #[test]
    fn test_unix_routes_only_node_host() {
        let transport =
            Transport::unix("/tmp/nodelink-unused.ipc", TransportConfig::default()).unwrap();
        assert!(transport.routes(NODE_HOST));
        assert!(!transport.routes("other"));
        assert!(!Transport::new(TransportConfig::default()).routes(NODE_HOST));
    }

    #[tokio::test]
    async fn test_unknown_host_is_rejected() {
        let transport =
            Transport::unix("/tmp/nodelink-unused.ipc", TransportConfig::default()).unwrap();
        let result = transport.send(get("http+unix://other/upcheck")).await;
        match result {
            Err(TransportError::UnknownLocation(host)) => assert_eq!(host, "other"),
            other => panic!("expected UnknownLocation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_http_scheme_is_rejected() {
        let transport =
            Transport::unix("/tmp/nodelink-unused.ipc", TransportConfig::default()).unwrap();
        let result = transport.send(get("http://c/upcheck")).await;
        assert!(matches!(result, Err(TransportError::UnsupportedScheme(_))));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let mut transport = Transport::new(TransportConfig {
            connect_timeout: Duration::from_millis(20),
            ..TransportConfig::default()
        });
        transport.register_location(NODE_HOST, StallingDialer);

        let result = transport.send(get("http+unix://c/upcheck")).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_header_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("silent.ipc");
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without ever answering.
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let transport = Transport::unix(
            &sock,
            TransportConfig {
                response_header_timeout: Duration::from_millis(50),
                ..TransportConfig::default()
            },
        )
        .unwrap();

        let result = transport.send(get("http+unix://c/upcheck")).await;
        assert!(matches!(result, Err(TransportError::HeaderTimeout(_))));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let transport = Transport::new(TransportConfig {
            request_timeout: Duration::from_millis(20),
            ..TransportConfig::default()
        });
        let result: Result<(), TransportError> = transport
            .within_deadline(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TransportError::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn test_request_is_rewritten_to_origin_form() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("node.ipc");
        let listener = UnixListener::bind(&sock).unwrap();
        let (head_tx, head_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            answer_once(stream, head_tx).await;
        });

        let transport = Transport::unix(&sock, TransportConfig::default()).unwrap();
        let response = transport
            .send(get("http+unix://c/receiveraw?x=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), hyper::StatusCode::OK);

        let head = head_rx.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /receiveraw?x=1 http/1.1\r\n"), "{head}");
        assert!(head.contains("\r\nhost: c\r\n"), "{head}");
    }

    #[tokio::test]
    async fn test_tcp_dialer_location() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (head_tx, head_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            answer_once(stream, head_tx).await;
        });

        let mut transport = Transport::new(TransportConfig::default());
        transport.register_location(NODE_HOST, TcpDialer::new(addr.to_string()));

        let response = transport.send(get("http+unix://c/upcheck")).await.unwrap();
        assert_eq!(response.status(), hyper::StatusCode::OK);
        assert!(head_rx.await.unwrap().starts_with("GET /upcheck"));
    }
}
