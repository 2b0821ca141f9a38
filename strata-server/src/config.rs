//! Router configuration.

use strata_core::Limits;

/// Configuration for one routing-tier server.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// System-wide limits (bucket size, refresh admission, intervals).
    pub limits: Limits,
    /// Admin commands slower than this count as slow operations, in
    /// milliseconds.
    pub slow_command_threshold_ms: u64,
}

impl RouterConfig {
    /// Creates a configuration with production defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limits: Limits::new(),
            slow_command_threshold_ms: 300,
        }
    }

    /// Overrides the limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides the slow-command threshold.
    #[must_use]
    pub const fn with_slow_command_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.slow_command_threshold_ms = threshold_ms;
        self
    }

    /// Configuration for unit tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            limits: Limits::for_testing(),
            slow_command_threshold_ms: u64::MAX,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}
