//! # Engine Configuration
//!
//! Tunables for a session engine instance, builder-style like `DbConfig`.

use std::time::Duration;

use meridian_core::types::TaxRate;
use meridian_core::DEFAULT_MAX_OPEN_SESSIONS;

/// Session engine configuration.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use meridian_session::EngineConfig;
///
/// let config = EngineConfig::default()
///     .max_open_sessions(3)
///     .idle_timeout(Duration::from_secs(30 * 60));
/// assert_eq!(config.max_open_sessions, 3);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum simultaneous open (Active/Suspended) sessions per
    /// (user, device). Default: 5.
    pub max_open_sessions: usize,

    /// Tax rate applied when the tax collaborator has no rate configured
    /// for a shop. Default: zero.
    pub fallback_tax_rate: TaxRate,

    /// How long a session may sit without activity before the expiry
    /// sweep claims it. Default: 4 hours (an abandoned tab from the
    /// previous shift).
    pub idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_open_sessions: DEFAULT_MAX_OPEN_SESSIONS,
            fallback_tax_rate: TaxRate::zero(),
            idle_timeout: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Sets the per-(user, device) open session cap.
    pub fn max_open_sessions(mut self, max: usize) -> Self {
        self.max_open_sessions = max;
        self
    }

    /// Sets the fallback tax rate for shops without a configured rate.
    pub fn fallback_tax_rate(mut self, rate: TaxRate) -> Self {
        self.fallback_tax_rate = rate;
        self
    }

    /// Sets the inactivity window for the expiry sweep.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_open_sessions, DEFAULT_MAX_OPEN_SESSIONS);
        assert!(config.fallback_tax_rate.is_zero());
        assert_eq!(config.idle_timeout, Duration::from_secs(14_400));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .max_open_sessions(2)
            .fallback_tax_rate(TaxRate::from_bps(825))
            .idle_timeout(Duration::from_secs(60));

        assert_eq!(config.max_open_sessions, 2);
        assert_eq!(config.fallback_tax_rate.bps(), 825);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }
}
