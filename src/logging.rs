//! Logging initialization over `tracing-subscriber`.
//!
//! The core emits only a handful of events itself (skipped mention resource
//! types, milestone recounts), so setup stays minimal: an env-filterable fmt
//! layer writing to stderr.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize logging for library consumers.
///
/// Respects `RUST_LOG`; defaults to `forgeboard=info` when unset. Safe to
/// call more than once.
pub fn init_logging(verbose: bool) {
    INIT.call_once(|| {
        let default = if verbose {
            "forgeboard=debug"
        } else {
            "forgeboard=info"
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Initialize logging for tests. Quiet by default, `RUST_LOG` overrides.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("forgeboard=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
