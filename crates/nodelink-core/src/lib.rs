#![deny(unsafe_code)]

//! nodelink core: a client for a local node's payload-exchange API.
//!
//! The node speaks HTTP/1.1 over a Unix domain socket. This crate provides
//! the socket-backed transport and a typed client for the node's three
//! operations: liveness check, payload send, and payload receive.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  http+unix://c/...   ┌─────────────┐   Unix socket   ┌────────┐
//! │  NodeClient  │─────────────────────▶│  Transport  │────────────────▶│  Node  │
//! │ (send/recv)  │  hyper::Request      │  (Dialer)   │  HTTP/1.1       │        │
//! └──────────────┘                      └─────────────┘                 └────────┘
//! ```

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, used where a trait method must
/// stay object-safe (see [`transport::Dialer`]).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Blocking facade over [`NodeClient`] for synchronous callers.
pub mod blocking;
/// Payload client for the node API.
pub mod client;
/// Base64 framing and JSON encoding helpers.
pub mod codec;
/// Socket-backed HTTP transport with synthetic host routing.
pub mod transport;

pub use blocking::BlockingNodeClient;
pub use client::{ErrorKind, NodeClient, NodeClientError, check_node};
pub use codec::{Base64StreamDecoder, CodecError};
pub use hyper::StatusCode;
pub use transport::{Dialer, TcpDialer, Transport, TransportConfig, TransportError, UnixDialer};
