//! Bus configuration.
//!
//! ```toml
//! capture_policy = "strict"   # or "warn"
//! auto_prune = true
//! sweep_interval = 1
//! ```

use serde::Deserialize;
use tracing::debug;

use crate::error::{BusError, BusResult};

/// What to do when a host-bound listener fails capture validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// Reject the registration with [`BusError::CaptureViolation`].
    #[default]
    Strict,
    /// Log the violation and register anyway.
    Warn,
}

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Capture validation policy for host-bound listeners.
    pub capture_policy: CapturePolicy,
    /// Compact dead records once the outermost dispatch returns.
    pub auto_prune: bool,
    /// Outermost dispatches between full scans for dead hosts.
    ///
    /// A dispatch that finds a dead host always triggers a scan, and
    /// [`EventBus::prune`](crate::EventBus::prune) always scans.
    pub sweep_interval: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capture_policy: CapturePolicy::Strict,
            auto_prune: true,
            sweep_interval: 1,
        }
    }
}

impl BusConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capture policy.
    #[must_use]
    pub fn with_capture_policy(mut self, policy: CapturePolicy) -> Self {
        self.capture_policy = policy;
        self
    }

    /// Enable or disable automatic pruning after dispatch.
    #[must_use]
    pub fn with_auto_prune(mut self, enabled: bool) -> Self {
        self.auto_prune = enabled;
        self
    }

    /// Set the number of dispatches between dead-host scans.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: u32) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConfigParse`] if the document is malformed or has
    /// unknown keys, and [`BusError::Config`] if validation fails.
    pub fn from_toml_str(source: &str) -> BusResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        debug!(?config, "Loaded bus config");
        Ok(config)
    }

    /// Check option values.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] if `sweep_interval` is zero.
    pub fn validate(&self) -> BusResult<()> {
        if self.sweep_interval == 0 {
            return Err(BusError::Config {
                message: "sweep_interval must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}
