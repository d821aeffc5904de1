//! Test harness helpers.

use std::sync::Arc;

use tether_events::EventBus;
use tracing_subscriber::EnvFilter;

use crate::fixtures::{TestHost, TestMessage, test_host};

/// Set up test logging with the given filter.
///
/// Call this at the start of tests that need logging output.
/// Safe to call multiple times (subsequent calls are no-ops).
///
/// # Example
///
/// ```rust,ignore
/// #[test]
/// fn my_test() {
///     setup_test_logging("tether_events=trace");
///     // ... test code
/// }
/// ```
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// An isolated bus plus a host, checked for leaks when dropped.
///
/// Mirrors a scene-based test: the host is destroyed at the end and the bus
/// must then report no receivers and no leaks.
#[derive(Debug)]
pub struct Scenario {
    /// The bus under test.
    pub bus: EventBus,
    /// The host listeners are bound to.
    pub host: Arc<TestHost>,
}

impl Scenario {
    /// Create a fresh bus and host.
    #[must_use]
    pub fn new() -> Self {
        setup_test_logging_default();
        Self {
            bus: EventBus::new(),
            host: test_host(),
        }
    }

    /// Assert the outcome of raising [`TestMessage`], then destroy the host
    /// and assert nothing is delivered or leaked afterwards.
    ///
    /// # Panics
    ///
    /// Panics if any of the checks fail.
    pub fn finish(self, expected: bool) {
        assert_eq!(
            self.bus.raise(TestMessage),
            expected,
            "unexpected raise result before destroy"
        );

        let weak = Arc::downgrade(&self.host);
        self.host.destroy();
        assert!(
            !self.bus.raise(TestMessage),
            "listeners survived host destruction"
        );
        assert!(!self.bus.is_leaking(), "live listeners on a dead host");

        drop(self.host);
        assert!(weak.upgrade().is_none(), "So we have a leak...");
        self.bus.prune();
        assert!(!self.bus.is_leaking());
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}
