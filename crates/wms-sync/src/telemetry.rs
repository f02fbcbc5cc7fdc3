//! # Tracing Setup
//!
//! The host application calls one of these once at startup.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=wms_sync=trace` - Show trace for the sync layer only
//! - Default: the filter passed in, e.g. `"info,wms_sync=debug,sqlx=warn"`

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,wms_sync=debug,wms_db=info,sqlx=warn";

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs the global fmt subscriber.
///
/// Panics if a global subscriber is already set. Use [`try_init_tracing`]
/// where that can happen (tests, embedding hosts).
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_target(true)
        .init();
}

/// Like [`init_tracing`], but returns false instead of panicking when a
/// subscriber is already installed.
pub fn try_init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_target(true)
        .try_init()
        .is_ok()
}
