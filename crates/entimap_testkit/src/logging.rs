//! Tracing setup for tests.

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Output goes
/// through the test writer so it is captured per test. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
