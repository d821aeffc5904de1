//! Event bus: registration, dispatch and maintenance.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace, warn};

use crate::capture::{self, Capture};
use crate::config::{BusConfig, CapturePolicy};
use crate::error::{BusError, BusResult};
use crate::host::{Host, HostId, TrackedHost};
use crate::registry::{ListenerId, ListenerRecord, Outcome, Registry};
use crate::subscription::Subscription;
use crate::wait::WaitHandle;

static GLOBAL: LazyLock<EventBus> = LazyLock::new(EventBus::new);

/// Shared state behind every clone of an [`EventBus`].
pub(crate) struct BusInner {
    registry: RwLock<Registry>,
    config: BusConfig,
    /// Number of `raise` calls currently on the stack.
    depth: AtomicUsize,
    /// Set when records died since the last prune.
    dirty: AtomicBool,
    /// Set when a dispatch found a dead host.
    host_gone: AtomicBool,
    /// Outermost dispatches since the last dead-host scan.
    since_sweep: AtomicU32,
}

impl BusInner {
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().expect("lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().expect("lock poisoned")
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn is_dispatching(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    /// Post-dispatch maintenance: retire records of dead hosts and, with
    /// `auto_prune`, compact.
    ///
    /// Skipped while any frame is active.
    fn maintain(&self) {
        if self.is_dispatching() {
            return;
        }
        let sweep = self.sweep_due() && self.read().has_dead_hosts();
        let prune = self.config.auto_prune && self.dirty.load(Ordering::Acquire);
        if !sweep && !prune {
            return;
        }
        let garbage = self.compact(sweep, self.config.auto_prune);
        drop(garbage);
    }

    /// Whether this outermost dispatch should scan for dead hosts.
    fn sweep_due(&self) -> bool {
        let elapsed = self
            .since_sweep
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        if self.host_gone.swap(false, Ordering::AcqRel) || elapsed >= self.config.sweep_interval {
            self.since_sweep.store(0, Ordering::Release);
            return true;
        }
        false
    }

    fn compact(&self, sweep: bool, prune: bool) -> Vec<Arc<ListenerRecord>> {
        let mut registry = self.write();
        if sweep {
            let retired = registry.sweep_dead_hosts();
            if retired > 0 {
                debug!(retired, "Retired listeners of dead hosts");
                self.mark_dirty();
            }
        }
        if !prune {
            return Vec::new();
        }
        self.dirty.store(false, Ordering::Release);
        registry.prune()
    }
}

/// Tracks dispatch nesting; restores the counter even if a handler panics.
struct DispatchDepth<'a> {
    depth: &'a AtomicUsize,
    level: usize,
}

impl<'a> DispatchDepth<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        let level = depth.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        Self { depth, level }
    }
}

impl Drop for DispatchDepth<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Type-keyed, reentrant, in-process event bus.
///
/// Listeners are keyed by the concrete message type and invoked in
/// registration order. Handlers may raise, register and unregister from
/// inside a dispatch:
///
/// - a nested `raise` runs to completion before the outer one continues,
/// - listeners registered during a dispatch see the next `raise`, not the
///   current one,
/// - listeners unregistered during a dispatch are skipped immediately, even
///   later in the same frame.
///
/// Cloning is cheap and shares the registry. Handler panics propagate out
/// of [`raise`](Self::raise); remaining listeners of that frame are skipped.
///
/// **WARNING:** a manual listener that captures a clone of its own bus forms
/// an `Arc` cycle until the listener is disposed. Host-bound listeners never
/// need to, since handlers receive the bus through their [`Scope`].
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new, isolated event bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_valid_config(BusConfig::default())
    }

    /// Create a new, isolated event bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] if `config` fails
    /// [`BusConfig::validate`].
    pub fn with_config(config: BusConfig) -> BusResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry::new()),
                config,
                depth: AtomicUsize::new(0),
                dirty: AtomicBool::new(false),
                host_gone: AtomicBool::new(false),
                since_sweep: AtomicU32::new(0),
            }),
        }
    }

    /// The process-wide default bus.
    ///
    /// Created on first use. Use [`clear`](Self::clear) to reset it between
    /// tests, or prefer isolated instances from [`new`](Self::new).
    #[must_use]
    pub fn global() -> &'static EventBus {
        &GLOBAL
    }

    /// Get the bus configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Start building a listener bound to `host`.
    pub fn on<'a, H: Host>(&'a self, host: &'a Arc<H>) -> HostListener<'a, H> {
        HostListener {
            bus: self,
            host,
            captured: (),
            gate: None,
        }
    }

    /// Register a capture-free listener bound to `host`.
    ///
    /// Shorthand for `bus.on(host).listen(handler)`.
    ///
    /// # Errors
    ///
    /// See [`HostListener::listen`].
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn listen<M, H, F>(&self, host: &Arc<H>, handler: F) -> BusResult<ListenerId>
    where
        M: 'static,
        H: Host,
        F: Fn(&Scope<'_, H, ()>, &M) + Send + Sync + 'static,
    {
        self.on(host).listen(handler)
    }

    /// Register a listener that is not bound to any host.
    ///
    /// No capture validation is performed: the caller owns the listener's
    /// lifetime through the returned [`Subscription`].
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn listen_manual<M, F>(&self, handler: F) -> Subscription
    where
        M: 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let deliver = move |_bus: &EventBus, message: &dyn Any| match message.downcast_ref::<M>() {
            Some(message) => {
                handler(message);
                Outcome::Invoked
            },
            None => Outcome::Gated,
        };

        let record = {
            let mut registry = self.inner.write();
            let id = registry.next_id();
            let record = Arc::new(ListenerRecord::new(
                id,
                TypeId::of::<M>(),
                type_name::<M>(),
                None,
                Box::new(deliver),
            ));
            registry.add(Arc::clone(&record));
            record
        };

        debug!(
            listener = %record.id(),
            message_type = type_name::<M>(),
            "Manual listener registered"
        );
        Subscription::new(
            record.id(),
            Arc::downgrade(&record),
            Arc::downgrade(&self.inner),
        )
    }

    /// Collect every `M` raised from now on; see [`WaitHandle`].
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn listen_wait<M>(&self) -> WaitHandle<M>
    where
        M: Clone + Send + 'static,
    {
        WaitHandle::new(self)
    }

    /// Unregister all of `host`'s listeners for `M`.
    ///
    /// Returns `true` if at least one live listener was found.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn unlisten<M: 'static>(&self, host: HostId) -> bool {
        let killed = self
            .inner
            .read()
            .remove_all_alive(host, Some(TypeId::of::<M>()));
        self.after_unlisten(host, killed, Some(type_name::<M>()))
    }

    /// Unregister all of `host`'s listeners.
    ///
    /// Returns `true` if at least one live listener was found.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn unlisten_all(&self, host: HostId) -> bool {
        let killed = self.inner.read().remove_all_alive(host, None);
        self.after_unlisten(host, killed, None)
    }

    /// Stop tracking `host` and unregister all of its listeners.
    ///
    /// Intended for a host's own teardown path, so its listeners are retired
    /// without waiting for the next dead-host sweep.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn forget_host(&self, host: HostId) -> bool {
        let killed = self.inner.write().forget_host(host);
        self.after_unlisten(host, killed, None)
    }

    fn after_unlisten(&self, host: HostId, killed: usize, message_type: Option<&str>) -> bool {
        if killed == 0 {
            return false;
        }
        debug!(
            host = %host,
            message_type = message_type.unwrap_or("*"),
            listeners = killed,
            "Listeners unregistered"
        );
        self.inner.mark_dirty();
        true
    }

    /// Deliver `message` to every live, eligible listener of its type.
    ///
    /// Returns `true` if at least one handler ran. Returns `false` without
    /// building a frame when the type has no listeners.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned. A panicking handler unwinds
    /// through `raise`; later listeners of that frame are skipped.
    pub fn raise<M: 'static>(&self, message: M) -> bool {
        let message_type = type_name::<M>();
        let Some(frame) = self.inner.read().snapshot(TypeId::of::<M>()) else {
            trace!(message_type, "No listeners for message");
            return false;
        };

        let depth = DispatchDepth::enter(&self.inner.depth);
        trace!(
            message_type,
            listeners = frame.len(),
            depth = depth.level,
            "Dispatching message"
        );

        let mut invoked = false;
        for record in &frame {
            if !record.is_alive() {
                continue;
            }
            match record.deliver(self, &message) {
                Outcome::Invoked => invoked = true,
                Outcome::Gated => {
                    trace!(listener = %record.id(), message_type, "Delivery gated");
                },
                Outcome::HostGone => {
                    self.inner.host_gone.store(true, Ordering::Release);
                    if record.kill() {
                        trace!(listener = %record.id(), message_type, "Host gone, listener retired");
                        self.inner.mark_dirty();
                    }
                },
            }
        }

        drop(depth);
        drop(frame);
        self.inner.maintain();
        invoked
    }

    /// Retire listeners of dead hosts and drop dead records now.
    ///
    /// Returns the number of records removed. Does nothing while a dispatch
    /// is in progress.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn prune(&self) -> usize {
        if self.inner.is_dispatching() {
            return 0;
        }
        let garbage = self.inner.compact(true, true);
        garbage.len()
    }

    /// Drop every listener unconditionally.
    ///
    /// This is a reset for test isolation, not a graceful unlisten.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn clear(&self) {
        let garbage = self.inner.write().clear();
        self.inner.dirty.store(false, Ordering::Release);
        debug!(dropped = garbage.len(), "Event bus cleared");
        drop(garbage);
    }

    /// Number of live listeners for `M`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn listener_count<M: 'static>(&self) -> usize {
        self.inner.read().count(TypeId::of::<M>())
    }

    /// Number of live listeners across all message types.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no live listener is registered.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistency check: `true` if a live listener belongs to a dead host.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_leaking(&self) -> bool {
        let leaking = self.inner.read().leaking_hosts();
        if leaking.is_empty() {
            return false;
        }
        warn!(hosts = ?leaking, "Live listeners reference dead hosts");
        true
    }

    /// Hosts that are gone but still own live listeners.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn leaking_hosts(&self) -> Vec<HostId> {
        self.inner.read().leaking_hosts()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .field("config", &self.inner.config)
            .field("depth", &self.inner.depth.load(Ordering::Relaxed))
            .finish()
    }
}

/// What a host-bound handler sees when it runs.
pub struct Scope<'a, H, C> {
    /// The bus that is dispatching; use it to raise or (un)register.
    pub bus: &'a EventBus,
    /// The owning host, upgraded for the duration of the call.
    pub host: &'a Arc<H>,
    /// The context declared at registration.
    pub captured: &'a C,
}

/// Builder for a host-bound listener. Created by [`EventBus::on`].
#[must_use = "a HostListener does nothing until `listen` is called"]
pub struct HostListener<'a, H: Host, C = ()> {
    bus: &'a EventBus,
    host: &'a Arc<H>,
    captured: C,
    gate: Option<fn(&H) -> bool>,
}

impl<'a, H: Host> HostListener<'a, H> {
    /// Declare the context the handler may use.
    ///
    /// The context is inspected when [`listen`](HostListener::listen) runs.
    pub fn capture<C: Capture>(self, captured: C) -> HostListener<'a, H, C> {
        HostListener {
            bus: self.bus,
            host: self.host,
            captured,
            gate: self.gate,
        }
    }
}

impl<H: Host, C: Capture> HostListener<'_, H, C> {
    /// Deliver only while [`Host::is_active_and_enabled`] holds.
    pub fn if_active_and_enabled(self) -> Self {
        self.gate(|host: &H| host.is_active_and_enabled())
    }

    /// Deliver only while `gate` holds for the host.
    pub fn gate(mut self, gate: fn(&H) -> bool) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Validate and register `handler`.
    ///
    /// # Errors
    ///
    /// - [`BusError::InvalidHost`] if the host is already dead.
    /// - [`BusError::CaptureViolation`] if the handler captures state itself,
    ///   or the declared context holds a shared reference or another host.
    ///   Under [`CapturePolicy::Warn`] the violation is logged instead.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn listen<M, F>(self, handler: F) -> BusResult<ListenerId>
    where
        M: 'static,
        F: Fn(&Scope<'_, H, C>, &M) + Send + Sync + 'static,
    {
        let host_id = self.host.host_id();
        if !self.host.is_alive() {
            return Err(BusError::InvalidHost { host: host_id });
        }

        if let Err(err) = capture::validate(&handler, &self.captured, host_id) {
            match self.bus.inner.config.capture_policy {
                CapturePolicy::Strict => {
                    debug!(host = %host_id, message_type = type_name::<M>(), error = %err, "Listener rejected");
                    return Err(err);
                },
                CapturePolicy::Warn => {
                    warn!(host = %host_id, message_type = type_name::<M>(), error = %err, "Registering listener despite capture violation");
                },
            }
        }

        let weak = Arc::downgrade(self.host);
        let captured = self.captured;
        let gate = self.gate;
        let deliver = move |bus: &EventBus, message: &dyn Any| {
            let Some(message) = message.downcast_ref::<M>() else {
                return Outcome::Gated;
            };
            let Some(host) = weak.upgrade().filter(|host| host.is_alive()) else {
                return Outcome::HostGone;
            };
            if gate.is_some_and(|gate| !gate(&host)) {
                return Outcome::Gated;
            }
            let scope = Scope {
                bus,
                host: &host,
                captured: &captured,
            };
            handler(&scope, message);
            Outcome::Invoked
        };

        let id = {
            let mut registry = self.bus.inner.write();
            let id = registry.next_id();
            registry.add(Arc::new(ListenerRecord::new(
                id,
                TypeId::of::<M>(),
                type_name::<M>(),
                Some(TrackedHost::new(self.host)),
                Box::new(deliver),
            )));
            id
        };

        debug!(
            listener = %id,
            host = %host_id,
            message_type = type_name::<M>(),
            gated = self.gate.is_some(),
            "Listener registered"
        );
        Ok(id)
    }
}
