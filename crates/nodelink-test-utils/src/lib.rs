#![deny(unsafe_code)]

//! Shared test utilities for the nodelink workspace.
//!
//! Provides a mock node that serves the payload API over a temporary Unix
//! socket, config builders, and tracing helpers so that individual crate
//! tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! nodelink-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod mock_node;
pub mod tracing_setup;

pub use mock_node::{MockNode, MockNodeBuilder, RecordedRequest, StalledNode};
