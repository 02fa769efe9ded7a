//! Logging initialization.
//!
//! The core logs through `tracing`: every envelope warning is mirrored at
//! `warn`, detection traces at `debug`. Host applications that already
//! install a subscriber can ignore this module; tests and small consumers
//! call [`init_logging`] once.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted subscriber honoring `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Safe to call more than
/// once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Install a JSON-formatted subscriber, for deployments that ship logs to
/// a collector.
pub fn init_json_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().json().with_env_filter(filter).try_init();
}
