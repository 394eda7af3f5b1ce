//! `tracing` subscriber setup for this crate's own test suite.
//!
//! The library itself only emits `tracing` events; it never installs a
//! subscriber (the same split `fiddler` draws between the `tracing` crate
//! and whatever binary wires up `tracing-subscriber`). This module is test
//! tooling only -- `tracing-subscriber` is a dev-dependency, not a runtime
//! dependency of the library.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` when the environment variable is unset. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
