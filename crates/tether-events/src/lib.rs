//! Tether Events - Type-keyed in-process event bus with host-bound listeners.
//!
//! This crate provides:
//! - A reentrant dispatch engine keyed by message type
//! - Host-bound listeners whose lifetime follows a weakly referenced owner
//! - Registration-time capture checks for host-bound handlers
//! - Disposable manual listeners and an awaitable wait-for-message handle
//!
//! # Architecture
//!
//! Listeners are registered on an [`EventBus`] in one of two ways:
//!
//! 1. **Host-bound**: `bus.on(&host)…listen(handler)`. The handler receives a
//!    [`Scope`] with the bus, the host and a declared context. The context is
//!    inspected with [`Capture`] so nothing retained by the listener can
//!    extend another object's lifetime. The listener dies with its host.
//!
//! 2. **Manual**: `bus.listen_manual(handler)` returns a [`Subscription`] the
//!    caller disposes explicitly. No capture checks apply.
//!
//! [`EventBus::raise`] snapshots the listener list of the message type and
//! invokes every live, eligible listener in registration order. Handlers may
//! raise, listen and unlisten reentrantly.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_events::{EventBus, Host, HostId};
//!
//! struct Door(HostId);
//! impl Host for Door {
//!     fn host_id(&self) -> HostId { self.0 }
//! }
//!
//! struct Opened;
//!
//! let bus = EventBus::new();
//! let door = Arc::new(Door(HostId::new()));
//!
//! bus.listen(&door, |scope, _msg: &Opened| {
//!     assert!(scope.host.is_alive());
//! })
//! .unwrap();
//!
//! assert!(bus.raise(Opened));
//!
//! // Listeners never keep their host alive.
//! drop(door);
//! assert!(!bus.raise(Opened));
//! assert!(!bus.is_leaking());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod capture;
mod config;
mod error;
mod host;
mod registry;
mod subscription;
mod wait;

pub use bus::{EventBus, HostListener, Scope};
pub use capture::{Capture, CaptureClass, Inspector, ViolationKind, inspect, validate};
pub use config::{BusConfig, CapturePolicy};
pub use error::{BusError, BusResult};
pub use host::{Host, HostId, HostRef};
pub use registry::ListenerId;
pub use subscription::Subscription;
pub use wait::{Wait, WaitHandle};
