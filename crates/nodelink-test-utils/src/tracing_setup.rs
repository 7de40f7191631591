//! Test subscriber for nodelink events.
//!
//! `#[test_log::test]` covers most tests. Plain `#[tokio::test]` and `#[test]`
//! functions that drive the mock node call [`init_test_tracing`] instead.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: client and mock-node events at
/// debug, everything else (hyper, axum) at warn.
pub const DEFAULT_TEST_FILTER: &str = "warn,nodelink_core=debug,nodelink_test_utils=debug";

/// Install a test-writer subscriber once per process. Later calls, and calls
/// after `test_log` has installed its own subscriber, are no-ops.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .try_init();
}
