//! Structural capture analysis for host-bound listeners.
//!
//! A host-bound listener lives as long as its host, which is usually far
//! longer than the scope that registered it. Anything the handler retains
//! must therefore be either plain data or a weak reference to that same
//! host. Instead of inspecting a closure's environment at runtime, the bus
//! separates the two concerns:
//!
//! - the handler closure must capture nothing at all (it is zero-sized),
//! - everything the handler needs travels in an explicit context value whose
//!   type implements [`Capture`].
//!
//! [`Capture::inspect`] walks the context and reports each captured leaf to
//! an [`Inspector`], which classifies it as a value, a host reference, or a
//! shared reference. Shared references (`Arc<T>`, including shared mutable
//! cells such as `Arc<Mutex<T>>`) are always rejected, even when the pointee
//! compares equal to something harmless.
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_events::{EventBus, Host, HostId};
//!
//! struct Panel(HostId);
//! impl Host for Panel {
//!     fn host_id(&self) -> HostId { self.0 }
//! }
//!
//! struct Refresh;
//!
//! let bus = EventBus::new();
//! let panel = Arc::new(Panel(HostId::new()));
//!
//! // Plain data is fine.
//! bus.on(&panel)
//!     .capture((String::from("sidebar"), 3_u32))
//!     .listen(|scope, _msg: &Refresh| {
//!         let (name, depth) = scope.captured;
//!         assert_eq!((name.as_str(), *depth), ("sidebar", 3));
//!     })
//!     .unwrap();
//!
//! // A shared reference is rejected at registration.
//! let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
//! let err = bus
//!     .on(&panel)
//!     .capture(counter)
//!     .listen(|_scope, _msg: &Refresh| {})
//!     .unwrap_err();
//! assert!(err.is_capture_violation());
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{BusError, BusResult};
use crate::host::{Host, HostId, HostRef};

/// Classification of one captured leaf value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureClass {
    /// Owned plain data.
    Value,
    /// A weak reference to the given host.
    Host(HostId),
    /// A reference-semantics edge to shared state.
    Shared,
}

/// Reason a capture was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The handler closure itself captured state instead of using the context.
    UndeclaredCapture,
    /// The context holds a shared reference.
    SharedReference,
    /// The context references a host other than the declared one.
    ForeignHost {
        /// The host the listener is registered on.
        expected: HostId,
        /// The host found in the context.
        found: HostId,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndeclaredCapture => {
                f.write_str("handler captures state directly; pass it through the context")
            },
            Self::SharedReference => f.write_str("shared reference outlives its owner"),
            Self::ForeignHost { expected, found } => {
                write!(f, "references {found} but listener is bound to {expected}")
            },
        }
    }
}

/// Visitor that classifies the leaves of a captured context.
///
/// Stops recording after the first violation.
#[derive(Debug)]
pub struct Inspector {
    host: Option<HostId>,
    leaves: usize,
    violation: Option<(&'static str, ViolationKind)>,
}

impl Inspector {
    fn new(host: Option<HostId>) -> Self {
        Self {
            host,
            leaves: 0,
            violation: None,
        }
    }

    /// Record a plain-data leaf of type `T`.
    pub fn value<T: ?Sized>(&mut self) {
        self.record(type_name::<T>(), CaptureClass::Value);
    }

    /// Record a weak host reference of type `T`.
    pub fn host<T: ?Sized>(&mut self, id: HostId) {
        self.record(type_name::<T>(), CaptureClass::Host(id));
    }

    /// Record a shared reference of type `T`.
    pub fn shared<T: ?Sized>(&mut self) {
        self.record(type_name::<T>(), CaptureClass::Shared);
    }

    /// Record a leaf with an explicit classification.
    pub fn record(&mut self, type_name: &'static str, class: CaptureClass) {
        if self.violation.is_some() {
            return;
        }
        self.leaves = self.leaves.saturating_add(1);

        let kind = match class {
            CaptureClass::Value => return,
            CaptureClass::Shared => ViolationKind::SharedReference,
            CaptureClass::Host(found) => match self.host {
                Some(expected) if expected == found => return,
                Some(expected) => ViolationKind::ForeignHost { expected, found },
                // Without a declared host there is nothing it could be identical to.
                None => ViolationKind::SharedReference,
            },
        };
        self.violation = Some((type_name, kind));
    }

    /// Number of leaves visited so far.
    #[must_use]
    pub fn leaves(&self) -> usize {
        self.leaves
    }

    fn finish(self) -> BusResult<usize> {
        match self.violation {
            None => Ok(self.leaves),
            Some((type_name, kind)) => Err(BusError::CaptureViolation { type_name, kind }),
        }
    }
}

/// A value that may be retained by a host-bound listener.
///
/// Implement by reporting every field to the inspector, or use
/// [`plain_data!`](crate::plain_data) for types made only of owned values.
pub trait Capture: Send + Sync + 'static {
    /// Report every captured leaf of `self` to `inspector`.
    fn inspect(&self, inspector: &mut Inspector);
}

/// Validate a host-bound handler and its context against `host`.
///
/// Returns the number of captured leaves on success.
///
/// # Errors
///
/// Returns [`BusError::CaptureViolation`] if the handler closure captures
/// anything itself, or if the context contains a shared reference or a
/// reference to a different host.
pub fn validate<F, C: Capture>(handler: &F, context: &C, host: HostId) -> BusResult<usize> {
    check_handler(handler)?;
    let mut inspector = Inspector::new(Some(host));
    context.inspect(&mut inspector);
    inspector.finish()
}

/// Classify `context` without a declared host.
///
/// # Errors
///
/// Returns [`BusError::CaptureViolation`] for any non-value leaf.
pub fn inspect<C: Capture>(context: &C) -> BusResult<usize> {
    let mut inspector = Inspector::new(None);
    context.inspect(&mut inspector);
    inspector.finish()
}

fn check_handler<F>(_handler: &F) -> BusResult<()> {
    if std::mem::size_of::<F>() == 0 {
        Ok(())
    } else {
        Err(BusError::CaptureViolation {
            type_name: type_name::<F>(),
            kind: ViolationKind::UndeclaredCapture,
        })
    }
}

/// Declare types as plain data that may be captured by host-bound listeners.
///
/// Only use this for types whose fields are all owned values. A type that
/// holds an `Arc` or a host reference must implement [`Capture`] by hand so
/// the inspector sees those fields.
#[macro_export]
macro_rules! plain_data {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Capture for $ty {
                fn inspect(&self, inspector: &mut $crate::Inspector) {
                    inspector.value::<Self>();
                }
            }
        )+
    };
}

plain_data!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
    Box<str>,
    Duration,
    Uuid,
    HostId,
);

impl<H: Host> Capture for HostRef<H> {
    fn inspect(&self, inspector: &mut Inspector) {
        inspector.host::<Self>(self.id());
    }
}

impl<T: ?Sized + Send + Sync + 'static> Capture for Arc<T> {
    fn inspect(&self, inspector: &mut Inspector) {
        inspector.shared::<Self>();
    }
}

impl<T: Capture> Capture for Option<T> {
    fn inspect(&self, inspector: &mut Inspector) {
        match self {
            Some(inner) => inner.inspect(inspector),
            None => inspector.value::<Self>(),
        }
    }
}

impl<T: Capture> Capture for Box<T> {
    fn inspect(&self, inspector: &mut Inspector) {
        (**self).inspect(inspector);
    }
}

impl<T: Capture> Capture for Vec<T> {
    fn inspect(&self, inspector: &mut Inspector) {
        inspector.value::<Self>();
        for item in self {
            item.inspect(inspector);
        }
    }
}

impl<T: Capture, const N: usize> Capture for [T; N] {
    fn inspect(&self, inspector: &mut Inspector) {
        inspector.value::<Self>();
        for item in self {
            item.inspect(inspector);
        }
    }
}

macro_rules! tuple_capture {
    ($($name:ident),+) => {
        impl<$($name: Capture),+> Capture for ($($name,)+) {
            #[allow(non_snake_case)]
            fn inspect(&self, inspector: &mut Inspector) {
                let ($($name,)+) = self;
                $($name.inspect(inspector);)+
            }
        }
    };
}

tuple_capture!(A);
tuple_capture!(A, B);
tuple_capture!(A, B, C);
tuple_capture!(A, B, C, D);
tuple_capture!(A, B, C, D, E);
tuple_capture!(A, B, C, D, E, F);
