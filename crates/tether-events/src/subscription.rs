//! Disposable handles for manual listeners.

use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::bus::BusInner;
use crate::registry::{ListenerId, ListenerRecord};

/// Handle to a manual listener.
///
/// The listener stays registered until [`dispose`](Self::dispose) is called
/// or the handle is dropped. Disposal is idempotent.
///
/// The handle only holds weak references, so it may be stored inside the
/// very handler it controls without creating a reference cycle.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    id: ListenerId,
    record: Weak<ListenerRecord>,
    bus: Weak<BusInner>,
    disposed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, record: Weak<ListenerRecord>, bus: Weak<BusInner>) -> Self {
        Self {
            id,
            record,
            bus,
            disposed: AtomicBool::new(false),
        }
    }

    /// ID of the underlying listener.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether this handle has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether the listener would still receive messages.
    ///
    /// `false` after disposal or after the bus was cleared.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_disposed() && self.record.upgrade().is_some_and(|r| r.is_alive())
    }

    /// Unregister the listener. Later calls are no-ops.
    ///
    /// Takes effect immediately, including for a dispatch that is already
    /// in progress.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(record) = self.record.upgrade() else {
            return;
        };
        if record.kill() {
            debug!(
                listener = %self.id,
                message_type = record.message_name(),
                "Manual listener disposed"
            );
            if let Some(bus) = self.bus.upgrade() {
                bus.mark_dirty();
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
