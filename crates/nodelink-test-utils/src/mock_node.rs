//! Mock node serving the payload API over a temporary Unix socket.
//!
//! By default the mock behaves like a real node: `/sendraw` mints a fresh
//! key, stores the payload under it and answers with the base64 key;
//! `/receiveraw` looks the key up. Each endpoint can be overridden with a
//! canned status and body. Every request is recorded for assertions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nodelink_core::client::{HEADER_KEY, HEADER_TO, RECEIVE_PATH, SEND_PATH, UPCHECK_PATH};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Body the mock answers `/upcheck` with.
pub const UPCHECK_BODY: &str = "I'm up!";

/// A request as seen by the mock node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// How an endpoint answers.
#[derive(Debug, Clone)]
enum Behavior {
    /// Act like a real node.
    Node,
    /// Answer with a fixed status and body.
    Fixed { status: StatusCode, body: Vec<u8> },
}

/// Shared state behind the mock node's routes.
pub struct MockNodeState {
    upcheck_status: StatusCode,
    send: Behavior,
    receive: Behavior,
    json_status: StatusCode,
    payloads: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    next_key: AtomicU64,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockNodeState {
    fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
        debug!(%method, %path, "mock node request");
        self.requests
            .lock()
            .expect("mock node request log poisoned")
            .push(RecordedRequest {
                method: method.to_string(),
                path,
                headers,
                body: body.to_vec(),
            });
    }

    fn mint_key(&self) -> Vec<u8> {
        let n = self.next_key.fetch_add(1, Ordering::Relaxed);
        let mut key = b"mock-distribution-key-".to_vec();
        key.extend_from_slice(&n.to_be_bytes());
        key
    }
}

/// Build the mock node router.
pub fn router(state: Arc<MockNodeState>) -> Router {
    Router::new()
        .route(UPCHECK_PATH, get(handle_upcheck))
        .route(SEND_PATH, post(handle_send))
        .route(RECEIVE_PATH, get(handle_receive))
        .fallback(handle_other)
        .with_state(state)
}

/// Configures and starts a [`MockNode`].
#[derive(Debug, Clone)]
pub struct MockNodeBuilder {
    upcheck_status: StatusCode,
    send: Behavior,
    receive: Behavior,
    json_status: StatusCode,
    preloaded: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MockNodeBuilder {
    pub fn new() -> Self {
        Self {
            upcheck_status: StatusCode::OK,
            send: Behavior::Node,
            receive: Behavior::Node,
            json_status: StatusCode::OK,
            preloaded: Vec::new(),
        }
    }

    /// Status returned by `/upcheck`.
    pub fn upcheck_status(mut self, status: StatusCode) -> Self {
        self.upcheck_status = status;
        self
    }

    /// Make `/sendraw` answer with a fixed status and body.
    pub fn send_responds(mut self, status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        self.send = Behavior::Fixed {
            status,
            body: body.into(),
        };
        self
    }

    /// Make `/receiveraw` answer with a fixed status and body.
    pub fn receive_responds(mut self, status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        self.receive = Behavior::Fixed {
            status,
            body: body.into(),
        };
        self
    }

    /// Status returned by any other POST (the JSON endpoints).
    pub fn json_status(mut self, status: StatusCode) -> Self {
        self.json_status = status;
        self
    }

    /// Store `payload` under the raw `key` before the node starts.
    pub fn with_payload(mut self, key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        self.preloaded.push((key.into(), payload.into()));
        self
    }

    pub fn build_state(self) -> Arc<MockNodeState> {
        Arc::new(MockNodeState {
            upcheck_status: self.upcheck_status,
            send: self.send,
            receive: self.receive,
            json_status: self.json_status,
            payloads: Mutex::new(self.preloaded.into_iter().collect()),
            next_key: AtomicU64::new(1),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Bind a fresh socket in a temp directory and start serving.
    pub async fn start(self) -> MockNode {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("node.ipc");
        let listener = UnixListener::bind(&socket_path).expect("failed to bind mock node socket");
        let state = self.build_state();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(Arc::clone(&state));
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "mock node stopped with error");
            }
        });

        MockNode {
            socket_path,
            state,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            _temp_dir: temp_dir,
        }
    }
}

impl Default for MockNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running mock node. Stops serving and removes its socket on drop.
pub struct MockNode {
    socket_path: PathBuf,
    state: Arc<MockNodeState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    _temp_dir: TempDir,
}

impl MockNode {
    /// Start a mock node with default (real-node-like) behaviour.
    pub async fn start() -> Self {
        MockNodeBuilder::new().start().await
    }

    pub fn builder() -> MockNodeBuilder {
        MockNodeBuilder::new()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// All requests received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .expect("mock node request log poisoned")
            .clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests().pop()
    }

    /// Payload stored under the raw `key`, if any.
    pub fn stored_payload(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state
            .payloads
            .lock()
            .expect("mock node payload store poisoned")
            .get(key)
            .cloned()
    }

    /// Stop serving and wait for the server task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A socket that accepts connections and never answers, for timeout tests.
pub struct StalledNode {
    socket_path: PathBuf,
    task: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl StalledNode {
    pub async fn start() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("stalled.ipc");
        let listener = UnixListener::bind(&socket_path).expect("failed to bind stalled socket");
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self {
            socket_path,
            task,
            _temp_dir: temp_dir,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for StalledNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_upcheck(
    State(state): State<Arc<MockNodeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, &'static str) {
    state.record(&method, &uri, &headers, &[]);
    (state.upcheck_status, UPCHECK_BODY)
}

async fn handle_send(
    State(state): State<Arc<MockNodeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    state.record(&method, &uri, &headers, &body);

    if let Behavior::Fixed { status, body } = &state.send {
        return (*status, body.clone());
    }
    if !headers.contains_key(HEADER_TO) {
        return (StatusCode::BAD_REQUEST, b"missing recipients".to_vec());
    }

    let key = state.mint_key();
    state
        .payloads
        .lock()
        .expect("mock node payload store poisoned")
        .insert(key.clone(), body.to_vec());
    (StatusCode::OK, STANDARD.encode(&key).into_bytes())
}

async fn handle_receive(
    State(state): State<Arc<MockNodeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, Vec<u8>) {
    state.record(&method, &uri, &headers, &[]);

    if let Behavior::Fixed { status, body } = &state.receive {
        return (*status, body.clone());
    }
    let Some(encoded) = headers.get(HEADER_KEY) else {
        return (StatusCode::BAD_REQUEST, b"missing key".to_vec());
    };
    let Ok(key) = STANDARD.decode(encoded.as_bytes()) else {
        return (StatusCode::BAD_REQUEST, b"key is not base64".to_vec());
    };

    let stored = state
        .payloads
        .lock()
        .expect("mock node payload store poisoned")
        .get(&key)
        .cloned();
    match stored {
        Some(payload) => (StatusCode::OK, payload),
        None => (StatusCode::NOT_FOUND, b"no payload for key".to_vec()),
    }
}

/// Any other path: POSTs echo their body with the configured JSON status.
async fn handle_other(
    State(state): State<Arc<MockNodeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    state.record(&method, &uri, &headers, &body);
    if method != Method::POST {
        return (StatusCode::NOT_FOUND, Vec::new());
    }
    (state.json_status, body.to_vec())
}
