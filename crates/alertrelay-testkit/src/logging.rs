//! Tracing setup for tests.

use std::sync::Once;

use tracing_subscriber::fmt;

static INIT: Once = Once::new();

/// Install a fmt subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
/// Output is captured per test and shown for failures.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .try_init();
    });
}
