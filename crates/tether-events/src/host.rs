//! Host identity and non-owning host references.
//!
//! A host is the logical owner of a listener registration. The bus never
//! holds a strong reference to a host: listener records keep a [`Weak`]
//! handle and ask the host whether it is still alive right before each
//! delivery. Dropping the last `Arc` to a host is therefore never delayed by
//! the listeners registered on its behalf.

use std::fmt;
use std::sync::{Arc, Weak};

use uuid::Uuid;

/// Stable identity of a host, used for equality and leak tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(Uuid);

impl HostId {
    /// Create a new random host ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a host ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host:{}", self.0)
    }
}

/// The owning object of host-bound listeners.
///
/// Hosts are shared as `Arc<H>`. The liveness predicate may flip to `false`
/// at any time outside the bus's control (for example when the owning
/// scene object is destroyed while Rust values still reference it).
pub trait Host: Send + Sync + 'static {
    /// Identity of this host.
    fn host_id(&self) -> HostId;

    /// Whether the host still exists logically.
    fn is_alive(&self) -> bool {
        true
    }

    /// Whether the host is currently active and enabled.
    ///
    /// Only consulted by listeners registered with
    /// [`if_active_and_enabled`](crate::HostListener::if_active_and_enabled).
    fn is_active_and_enabled(&self) -> bool {
        true
    }
}

/// A non-owning reference to a host.
///
/// This is the only way a host may appear inside a listener's captured
/// context. It cannot keep the host alive.
pub struct HostRef<H: Host> {
    id: HostId,
    weak: Weak<H>,
}

impl<H: Host> HostRef<H> {
    /// Create a weak reference to `host`.
    #[must_use]
    pub fn new(host: &Arc<H>) -> Self {
        Self {
            id: host.host_id(),
            weak: Arc::downgrade(host),
        }
    }

    /// Identity of the referenced host.
    #[must_use]
    pub fn id(&self) -> HostId {
        self.id
    }

    /// Upgrade to a strong reference if the host still exists and is alive.
    #[must_use]
    pub fn get(&self) -> Option<Arc<H>> {
        self.weak.upgrade().filter(|host| host.is_alive())
    }

    /// Whether the referenced host still exists and is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.get().is_some()
    }
}

impl<H: Host> Clone for HostRef<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            weak: Weak::clone(&self.weak),
        }
    }
}

impl<H: Host> fmt::Debug for HostRef<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Type-erased weak host slot kept by the liveness tracker.
#[derive(Clone)]
pub(crate) struct TrackedHost {
    pub(crate) id: HostId,
    weak: Weak<dyn Host>,
}

impl TrackedHost {
    pub(crate) fn new<H: Host>(host: &Arc<H>) -> Self {
        let weak: Weak<dyn Host> = Arc::downgrade(host) as Weak<dyn Host>;
        Self {
            id: host.host_id(),
            weak,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.weak.upgrade().is_some_and(|host| host.is_alive())
    }
}

impl fmt::Debug for TrackedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedHost")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
