//! Payload client: typed access to the node's payload-exchange API.
//!
//! Every operation is a single HTTP exchange over the bound [`Transport`]:
//!
//! | Operation                           | Request                 | Success body        |
//! |-------------------------------------|-------------------------|---------------------|
//! | [`upcheck`](NodeClient::upcheck)    | `GET /upcheck`          | ignored             |
//! | [`send_payload`](NodeClient::send_payload) | `POST /sendraw`  | base64 key          |
//! | [`receive_payload`](NodeClient::receive_payload) | `GET /receiveraw` | raw payload  |
//! | [`post_json`](NodeClient::post_json) | `POST <path>` (JSON)   | returned as-is      |
//!
//! Nothing is retried. Any status other than `200 OK` is a failure.

use std::path::{Path, PathBuf};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde::Serialize;
use tracing::debug;

use crate::codec::{self, Base64StreamDecoder, CodecError};
use crate::transport::{NODE_HOST, NODE_SCHEME, Transport, TransportConfig, TransportError};

pub const UPCHECK_PATH: &str = "/upcheck";
pub const SEND_PATH: &str = "/sendraw";
pub const RECEIVE_PATH: &str = "/receiveraw";

/// Sender participant identifier (base64 public key).
pub const HEADER_FROM: &str = "c11n-from";
/// Comma-joined recipient identifiers.
pub const HEADER_TO: &str = "c11n-to";
/// Base64 distribution key.
pub const HEADER_KEY: &str = "c11n-key";

const OCTET_STREAM: &str = "application/octet-stream";
const JSON: &str = "application/json";

/// Longest body excerpt kept on an [`NodeClientError::UnexpectedStatus`].
const MAX_ERROR_BODY: usize = 512;

/// Coarse classification of a [`NodeClientError`], for callers deciding
/// whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dial failure, timeout, or I/O failure on the socket.
    Connectivity,
    /// The node answered with a status other than 200.
    UnexpectedStatus,
    /// A request body could not be encoded or a response body decoded.
    Encoding,
    /// The node is reachable but its upcheck did not return 200.
    HealthCheck,
    /// The call was rejected locally before anything was sent.
    InvalidInput,
}

/// Errors from node client operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("node returned {status} for {path}: {body}")]
    UnexpectedStatus {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("node at {socket} is unhealthy: upcheck returned {status}")]
    Unhealthy { socket: PathBuf, status: StatusCode },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("failed to start blocking runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl NodeClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::EmptySocketPath)
            | Self::Transport(TransportError::InvalidRequest(_))
            | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Transport(_) | Self::Runtime(_) => ErrorKind::Connectivity,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::Unhealthy { .. } => ErrorKind::HealthCheck,
            Self::Codec(_) => ErrorKind::Encoding,
        }
    }

    /// The HTTP status the node answered with, if it answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UnexpectedStatus { status, .. } | Self::Unhealthy { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client bound to one node socket.
///
/// Holds no session state; each method is an independent exchange and calls
/// may run concurrently on a shared reference.
#[derive(Debug, Clone)]
pub struct NodeClient {
    socket_path: PathBuf,
    transport: Transport,
}

impl NodeClient {
    /// Create a client for the node listening at `socket_path`, with default
    /// timeouts.
    pub fn new(socket_path: impl Into<PathBuf>) -> Result<Self, NodeClientError> {
        Self::with_config(socket_path, TransportConfig::default())
    }

    /// Create a client with explicit transport timeouts.
    pub fn with_config(
        socket_path: impl Into<PathBuf>,
        config: TransportConfig,
    ) -> Result<Self, NodeClientError> {
        let socket_path = socket_path.into();
        let transport = Transport::unix(&socket_path, config)?;
        Ok(Self {
            socket_path,
            transport,
        })
    }

    /// Create a client over a pre-built transport. The transport must route
    /// [`NODE_HOST`]; `socket_path` is only used in diagnostics.
    pub fn with_transport(
        socket_path: impl Into<PathBuf>,
        transport: Transport,
    ) -> Result<Self, NodeClientError> {
        if !transport.routes(NODE_HOST) {
            return Err(TransportError::UnknownLocation(NODE_HOST.to_string()).into());
        }
        Ok(Self {
            socket_path: socket_path.into(),
            transport,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Liveness check. Succeeds only on `200 OK`.
    pub async fn upcheck(&self) -> Result<(), NodeClientError> {
        self.transport
            .within_deadline(async {
                let request = request(Method::GET, UPCHECK_PATH, Bytes::new())?;
                let response = self.transport.send(request).await?;
                let status = response.status();
                // Drain so the connection closes cleanly; the content is ignored.
                if let Err(err) = response.into_body().collect().await {
                    debug!(error = %err, "upcheck body drain failed");
                }
                if status != StatusCode::OK {
                    return Err(NodeClientError::Unhealthy {
                        socket: self.socket_path.clone(),
                        status,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Submit `payload` for distribution to `recipients` and return the raw
    /// distribution key.
    ///
    /// `sender` is sent verbatim in `c11n-from` when present and non-empty;
    /// otherwise the header is omitted and the node picks its default.
    /// Recipients are joined with `,` into `c11n-to` as given.
    pub async fn send_payload<S: AsRef<str>>(
        &self,
        payload: &[u8],
        sender: Option<&str>,
        recipients: &[S],
    ) -> Result<Vec<u8>, NodeClientError> {
        if recipients.is_empty() {
            return Err(NodeClientError::InvalidInput(
                "at least one recipient is required".to_string(),
            ));
        }
        let to = recipients
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");

        let mut request = request(Method::POST, SEND_PATH, Bytes::copy_from_slice(payload))?;
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
        headers.insert(HeaderName::from_static(HEADER_TO), header_value(HEADER_TO, &to)?);
        if let Some(from) = sender.filter(|s| !s.is_empty()) {
            headers.insert(HeaderName::from_static(HEADER_FROM), header_value(HEADER_FROM, from)?);
        }

        let key = self
            .transport
            .within_deadline(async {
                let response = self.exchange(SEND_PATH, request).await?;
                read_base64_body(response).await
            })
            .await?;

        debug!(
            socket = %self.socket_path.display(),
            bytes = payload.len(),
            recipients = recipients.len(),
            "payload sent"
        );
        Ok(key)
    }

    /// Fetch the payload stored under `key`.
    pub async fn receive_payload(&self, key: &[u8]) -> Result<Vec<u8>, NodeClientError> {
        let encoded = codec::encode_key(key);
        let mut request = request(Method::GET, RECEIVE_PATH, Bytes::new())?;
        request.headers_mut().insert(
            HeaderName::from_static(HEADER_KEY),
            header_value(HEADER_KEY, &encoded)?,
        );

        let payload = self
            .transport
            .within_deadline(async {
                let response = self.exchange(RECEIVE_PATH, request).await?;
                collect_body(response).await
            })
            .await?;

        debug!(socket = %self.socket_path.display(), bytes = payload.len(), "payload received");
        Ok(payload.to_vec())
    }

    /// POST `value` as JSON to `path` and return the response body.
    ///
    /// Serialization happens before anything is sent, so an unencodable value
    /// never reaches the node.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<Bytes, NodeClientError> {
        let body = codec::encode_json(value)?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let mut request = request(Method::POST, &path, Bytes::from(body))?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));

        self.transport
            .within_deadline(async {
                let response = self.exchange(&path, request).await?;
                collect_body(response).await
            })
            .await
    }

    /// Send `request` and fail unless the node answers `200 OK`.
    async fn exchange(
        &self,
        path: &str,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, NodeClientError> {
        let response = self.transport.send(request).await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        let body = match response.into_body().collect().await {
            Ok(collected) => excerpt(&collected.to_bytes()),
            Err(_) => String::new(),
        };
        debug!(path, %status, "node rejected request");
        Err(NodeClientError::UnexpectedStatus {
            path: path.to_string(),
            status,
            body,
        })
    }
}

/// One-shot liveness check of the node at `socket_path` with default
/// timeouts.
pub async fn check_node(socket_path: impl Into<PathBuf>) -> Result<(), NodeClientError> {
    NodeClient::new(socket_path)?.upcheck().await
}

/// Build a request for `path` on the synthetic node endpoint.
fn request(method: Method, path: &str, body: Bytes) -> Result<Request<Full<Bytes>>, NodeClientError> {
    if !path.starts_with('/') {
        return Err(NodeClientError::InvalidInput(format!(
            "request path must be absolute: {path:?}"
        )));
    }
    let uri = format!("{NODE_SCHEME}://{NODE_HOST}{path}")
        .parse::<Uri>()
        .map_err(|e| NodeClientError::InvalidInput(format!("bad request path {path:?}: {e}")))?;

    let mut request = Request::new(Full::new(body));
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    Ok(request)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, NodeClientError> {
    HeaderValue::from_str(value)
        .map_err(|_| NodeClientError::InvalidInput(format!("{name} is not a valid header value")))
}

async fn collect_body(response: Response<Incoming>) -> Result<Bytes, NodeClientError> {
    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(TransportError::Body)?;
    Ok(collected.to_bytes())
}

/// Decode a base64 body frame by frame. The body is dropped on return, on
/// both the success and the error path.
async fn read_base64_body(response: Response<Incoming>) -> Result<Vec<u8>, NodeClientError> {
    let mut body = response.into_body();
    let mut decoder = Base64StreamDecoder::new();
    let mut key = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(TransportError::Body)?;
        if let Ok(data) = frame.into_data() {
            key.extend(decoder.update(&data)?);
        }
    }
    decoder.finish()?;
    Ok(key)
}

fn excerpt(body: &[u8]) -> String {
    let cut = body.len().min(MAX_ERROR_BODY);
    let mut text = String::from_utf8_lossy(&body[..cut]).into_owned();
    if body.len() > cut {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_empty_socket_path() {
        let err = NodeClient::new("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_client_keeps_socket_path() {
        let client = NodeClient::new("/tmp/nodelink-test.ipc").unwrap();
        assert_eq!(client.socket_path(), Path::new("/tmp/nodelink-test.ipc"));
        assert_eq!(*client.transport().config(), TransportConfig::default());
    }

    #[test]
    fn test_with_transport_requires_node_route() {
        let bare = Transport::new(TransportConfig::default());
        let err = NodeClient::with_transport("/tmp/nodelink-test.ipc", bare).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(matches!(
            err,
            NodeClientError::Transport(TransportError::UnknownLocation(ref host))
                if host == NODE_HOST
        ));

        let transport =
            Transport::unix("/tmp/nodelink-test.ipc", TransportConfig::default()).unwrap();
        let client = NodeClient::with_transport("/tmp/nodelink-test.ipc", transport).unwrap();
        assert_eq!(client.socket_path(), Path::new("/tmp/nodelink-test.ipc"));
    }

    #[tokio::test]
    async fn test_send_requires_recipients() {
        let client = NodeClient::new("/tmp/nodelink-missing.ipc").unwrap();
        let err = client
            .send_payload::<&str>(b"hello", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_send_rejects_unencodable_header() {
        let client = NodeClient::new("/tmp/nodelink-missing.ipc").unwrap();
        let err = client
            .send_payload(b"hello", Some("bad\nsender"), &["BBBB"])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_upcheck_without_listener_is_connectivity_error() {
        let err = check_node("/tmp/nodelink-missing.ipc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.status().is_none());
    }

    #[tokio::test]
    async fn test_json_encoding_error_precedes_request() {
        use std::collections::HashMap;

        // Non-string map keys cannot be encoded as JSON objects. The socket
        // does not exist, so reaching the transport would be a dial error.
        let mut value = HashMap::new();
        value.insert(vec![1u8], "x");
        let client = NodeClient::new("/tmp/nodelink-missing.ipc").unwrap();
        let err = client.post_json("partyinfo", &value).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let body = vec![b'x'; MAX_ERROR_BODY + 10];
        let text = excerpt(&body);
        assert_eq!(text.len(), MAX_ERROR_BODY + 3);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn test_error_kinds() {
        let err = NodeClientError::UnexpectedStatus {
            path: SEND_PATH.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        assert_eq!(err.kind(), ErrorKind::UnexpectedStatus);
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        let err = NodeClientError::from(CodecError::Truncated { pending: 2 });
        assert_eq!(err.kind(), ErrorKind::Encoding);

        let err = NodeClientError::from(TransportError::HeaderTimeout(
            std::time::Duration::from_secs(5),
        ));
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
}
