//! Test fixtures: hosts and messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_events::{Host, HostId};

/// First test message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestMessage;

/// Second test message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestMessage2;

/// Third test message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestMessage3;

/// A message carrying a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numbered(pub u32);

/// A host with toggleable liveness, active and enabled flags.
///
/// Mirrors a scene component: it can be destroyed while Rust code still
/// holds an `Arc` to it, and it can be deactivated or disabled without
/// being destroyed.
#[derive(Debug)]
pub struct TestHost {
    id: HostId,
    name: String,
    alive: AtomicBool,
    active: AtomicBool,
    enabled: AtomicBool,
}

impl TestHost {
    /// Create a live, active and enabled host.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: HostId::new(),
            name: name.into(),
            alive: AtomicBool::new(true),
            active: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
        })
    }

    /// Host identity.
    #[must_use]
    pub fn id(&self) -> HostId {
        self.id
    }

    /// Host name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destroy the host logically; `Arc`s to it stay valid.
    pub fn destroy(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Activate or deactivate the host.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Enable or disable the host.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Host for TestHost {
    fn host_id(&self) -> HostId {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_active_and_enabled(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.enabled.load(Ordering::SeqCst)
    }
}

/// Create a test host named `"Test"`.
#[must_use]
pub fn test_host() -> Arc<TestHost> {
    TestHost::new("Test")
}
