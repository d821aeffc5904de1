//! Tether Test - Shared test utilities for the tether event bus.
//!
//! This crate provides host fixtures, message fixtures and logging helpers
//! that can be used across tether crates as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tether-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use tether_events::EventBus;
//! use tether_test::{TestHost, TestMessage};
//!
//! #[test]
//! fn test_host_destroyed() {
//!     let bus = EventBus::new();
//!     let host = TestHost::new("panel");
//!     bus.listen(&host, |_, _msg: &TestMessage| {}).unwrap();
//!
//!     host.destroy();
//!     assert!(!bus.raise(TestMessage));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
