//! Listener records, the per-message-type registry and the host tracker.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::bus::EventBus;
use crate::host::{HostId, TrackedHost};

/// Registration handle and ordering key of one listener.
///
/// IDs are handed out from a per-bus counter, so comparing two IDs of the
/// same bus compares their registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the raw registration counter value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// What happened when a record was offered a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The handler ran.
    Invoked,
    /// The gate rejected delivery; the record stays alive.
    Gated,
    /// The owning host is gone or no longer alive.
    HostGone,
}

/// Type-erased delivery function stored in a record.
pub(crate) type Deliver = dyn Fn(&EventBus, &dyn Any) -> Outcome + Send + Sync;

/// One registration.
pub(crate) struct ListenerRecord {
    id: ListenerId,
    message_type: TypeId,
    message_name: &'static str,
    host: Option<TrackedHost>,
    alive: AtomicBool,
    deliver: Box<Deliver>,
}

impl ListenerRecord {
    pub(crate) fn new(
        id: ListenerId,
        message_type: TypeId,
        message_name: &'static str,
        host: Option<TrackedHost>,
        deliver: Box<Deliver>,
    ) -> Self {
        Self {
            id,
            message_type,
            message_name,
            host,
            alive: AtomicBool::new(true),
            deliver,
        }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn message_name(&self) -> &'static str {
        self.message_name
    }

    pub(crate) fn host_id(&self) -> Option<HostId> {
        self.host.as_ref().map(|host| host.id)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the record dead. Returns `true` if it was alive before.
    pub(crate) fn kill(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Alive, but bound to a host that no longer exists.
    pub(crate) fn is_orphaned(&self) -> bool {
        self.is_alive() && self.host.as_ref().is_some_and(|host| !host.is_alive())
    }

    pub(crate) fn deliver(&self, bus: &EventBus, message: &dyn Any) -> Outcome {
        (self.deliver)(bus, message)
    }
}

impl fmt::Debug for ListenerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRecord")
            .field("id", &self.id)
            .field("message_type", &self.message_name)
            .field("host", &self.host_id())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Host liveness tracker entry.
#[derive(Debug)]
struct HostEntry {
    host: TrackedHost,
    records: Vec<Weak<ListenerRecord>>,
}

impl HostEntry {
    fn live_records(&self) -> impl Iterator<Item = Arc<ListenerRecord>> + '_ {
        self.records
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|record| record.is_alive())
    }
}

/// Message type to ordered listener list, plus the host tracker.
///
/// Lists are only ever appended to or compacted; dispatch works on copies
/// taken by [`Registry::snapshot`], so compaction can never disturb an
/// in-progress frame.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    lists: HashMap<TypeId, Vec<Arc<ListenerRecord>>>,
    hosts: HashMap<HostId, HostEntry>,
    next_order: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_order);
        self.next_order = self.next_order.wrapping_add(1);
        id
    }

    /// Append a record to its message type's list and track its host.
    pub(crate) fn add(&mut self, record: Arc<ListenerRecord>) {
        if let Some(host) = &record.host {
            self.hosts
                .entry(host.id)
                .or_insert_with(|| HostEntry {
                    host: host.clone(),
                    records: Vec::new(),
                })
                .records
                .push(Arc::downgrade(&record));
        }
        self.lists
            .entry(record.message_type)
            .or_default()
            .push(record);
    }

    /// Copy of the listener list for `message_type`, or `None` if it is empty.
    pub(crate) fn snapshot(&self, message_type: TypeId) -> Option<Vec<Arc<ListenerRecord>>> {
        self.lists
            .get(&message_type)
            .filter(|list| !list.is_empty())
            .cloned()
    }

    /// Kill every live record of `host`, optionally restricted to one type.
    ///
    /// Returns the number of records that were alive.
    pub(crate) fn remove_all_alive(&self, host: HostId, message_type: Option<TypeId>) -> usize {
        let Some(entry) = self.hosts.get(&host) else {
            return 0;
        };
        entry
            .live_records()
            .filter(|record| message_type.is_none_or(|ty| record.message_type == ty))
            .filter(|record| record.kill())
            .count()
    }

    /// Stop tracking `host`, killing its remaining records.
    pub(crate) fn forget_host(&mut self, host: HostId) -> usize {
        let killed = self.remove_all_alive(host, None);
        self.hosts.remove(&host);
        killed
    }

    /// Whether any tracked host has died since the last sweep.
    pub(crate) fn has_dead_hosts(&self) -> bool {
        self.hosts.values().any(|entry| !entry.host.is_alive())
    }

    /// Kill the records of every tracked host that is no longer alive.
    pub(crate) fn sweep_dead_hosts(&mut self) -> usize {
        let mut killed = 0_usize;
        self.hosts.retain(|id, entry| {
            if entry.host.is_alive() {
                return true;
            }
            let count = entry.live_records().filter(|record| record.kill()).count();
            trace!(host = %id, records = count, "Host gone, retiring listeners");
            killed = killed.saturating_add(count);
            false
        });
        killed
    }

    /// Detach dead records. Never called while a frame is active.
    ///
    /// The detached records are returned instead of dropped: dropping a
    /// handler may run arbitrary `Drop` code (including disposing other
    /// subscriptions), which must happen after the registry lock is released.
    pub(crate) fn prune(&mut self) -> Vec<Arc<ListenerRecord>> {
        let mut garbage = Vec::new();
        self.lists.retain(|_, list| {
            let (alive, dead): (Vec<_>, Vec<_>) =
                std::mem::take(list).into_iter().partition(|r| r.is_alive());
            *list = alive;
            garbage.extend(dead);
            !list.is_empty()
        });
        self.hosts.retain(|_, entry| {
            entry
                .records
                .retain(|weak| weak.upgrade().is_some_and(|record| record.is_alive()));
            !entry.records.is_empty()
        });
        if !garbage.is_empty() {
            debug!(removed = garbage.len(), "Pruned dead listeners");
        }
        garbage
    }

    /// Detach everything. Outstanding frames see the records as dead.
    pub(crate) fn clear(&mut self) -> Vec<Arc<ListenerRecord>> {
        self.hosts.clear();
        let garbage: Vec<_> = self.lists.drain().flat_map(|(_, list)| list).collect();
        for record in &garbage {
            record.kill();
        }
        garbage
    }

    /// Number of live records for `message_type`.
    pub(crate) fn count(&self, message_type: TypeId) -> usize {
        self.lists.get(&message_type).map_or(0, |list| {
            list.iter().filter(|record| record.is_alive()).count()
        })
    }

    /// Number of live records across all message types.
    pub(crate) fn len(&self) -> usize {
        self.lists
            .values()
            .flatten()
            .filter(|record| record.is_alive())
            .count()
    }

    /// Hosts that no longer exist but still own live records.
    pub(crate) fn leaking_hosts(&self) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self
            .lists
            .values()
            .flatten()
            .filter(|record| record.is_orphaned())
            .filter_map(|record| record.host_id())
            .collect();
        hosts.sort_unstable();
        hosts.dedup();
        hosts
    }
}
