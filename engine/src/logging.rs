//! Tracing subscriber setup for binaries and tests embedding the engine.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Filter via `RUST_LOG`, defaulting to
/// `info` for the engine's own spans.
pub fn init(default_directives: &str) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_directives));
	tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Best-effort init for tests: repeated calls are fine.
pub fn init_for_tests() {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new("ledgerlink_engine=debug"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_test_writer()
		.try_init();
}
