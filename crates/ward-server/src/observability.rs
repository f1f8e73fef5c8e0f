//! Log setup for the ward server.
//!
//! The filter sits behind a reload layer: the server starts at [`STARTUP_LEVEL`] and switches to
//! `logging.level` from `ward.toml` once configuration has loaded. An explicit `RUST_LOG`
//! pins the filter for the whole run.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Level used until configuration has been read.
pub const STARTUP_LEVEL: &str = "info";

pub fn init_tracing() {
    init_tracing_with_level(STARTUP_LEVEL);
}

/// Install the global subscriber. Only the first call has an effect.
pub fn init_tracing_with_level(level: &str) {
    let filter = if rust_log_pinned() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let (filter, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Switch to the configured level. No-op when `RUST_LOG` is set or tracing was never installed.
pub fn apply_logging_level(level: &str) {
    if rust_log_pinned() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(level)) {
        tracing::warn!(level, error = %e, "failed to apply logging level");
    }
}

fn rust_log_pinned() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}
