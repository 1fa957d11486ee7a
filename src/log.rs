//! Structured logging setup for weave.
//!
//! Log levels:
//! - ERROR: Workflows or provisioning that could not complete
//! - WARN: Step failures, retries, skipped requirements
//! - INFO: Workflow lifecycle (start, state changes, finish)
//! - DEBUG: Batch and step dispatch, agent selection
//! - TRACE: Per-attempt detail
//!
//! Debug mode can be enabled with `init_with_debug(true)` or the
//! `WEAVE_DEBUG=1` env var. `RUST_LOG` takes precedence when set.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable that turns on debug-level output.
pub const DEBUG_ENV: &str = "WEAVE_DEBUG";

/// Initialize logging at the default (info) level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "weave=debug"
    } else {
        "weave=info"
    }
}
