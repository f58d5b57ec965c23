//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `directives` follows the usual env-filter
/// syntax (`info`, `wallet_app=debug,info`, …); invalid input falls back to
/// `info`.
pub fn init(directives: &str) {
    let filter =
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Test-friendly init: captures output per test, tolerates double init.
pub fn init_for_testing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
