//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tether_events::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use tether_events::prelude::*;
//!
//! struct Saved;
//!
//! let bus = EventBus::new();
//! let sub = bus.listen_manual(|_msg: &Saved| {});
//! assert!(bus.raise(Saved));
//! sub.dispose();
//! assert!(!bus.raise(Saved));
//! ```

// Event bus
pub use crate::{EventBus, HostListener, Scope};

// Hosts
pub use crate::{Host, HostId, HostRef};

// Capture checks
pub use crate::{Capture, Inspector};

// Handles
pub use crate::{ListenerId, Subscription, WaitHandle};

// Errors and configuration
pub use crate::{BusConfig, BusError, BusResult, CapturePolicy};
