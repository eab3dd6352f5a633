//! Cache manager configuration.

use std::time::Duration;

/// Configuration for a [`CacheManager`](crate::CacheManager).
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of stripe locks. Rounded up to a power of two.
    pub lock_stripes: usize,

    /// Interval between background commit passes (zero = only on demand).
    pub commit_period: Duration,

    /// Modification count that triggers an early commit pass (0 = never).
    pub commit_mod_threshold: u64,

    /// How many times a conflicting transaction is re-run before giving up.
    pub redo_limit: u32,

    /// Bound on waiting for a transaction's locks (`None` = wait forever).
    pub lock_timeout: Option<Duration>,

    /// Read cache capacity for tables that do not set their own.
    pub default_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_stripes: 4096,
            commit_period: Duration::from_secs(60),
            commit_mod_threshold: 200_000,
            redo_limit: 256,
            lock_timeout: None,
            default_cache_size: 10_000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of stripe locks.
    #[must_use]
    pub const fn lock_stripes(mut self, count: usize) -> Self {
        self.lock_stripes = count;
        self
    }

    /// Sets the background commit interval.
    #[must_use]
    pub const fn commit_period(mut self, period: Duration) -> Self {
        self.commit_period = period;
        self
    }

    /// Sets the modification count that triggers an early commit pass.
    #[must_use]
    pub const fn commit_mod_threshold(mut self, count: u64) -> Self {
        self.commit_mod_threshold = count;
        self
    }

    /// Sets the redo limit.
    #[must_use]
    pub const fn redo_limit(mut self, limit: u32) -> Self {
        self.redo_limit = limit;
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the default read cache capacity.
    #[must_use]
    pub const fn default_cache_size(mut self, size: usize) -> Self {
        self.default_cache_size = size;
        self
    }

    /// Configuration for tests: no periodic or threshold-triggered commit
    /// passes, few stripes.
    #[must_use]
    pub fn manual() -> Self {
        Self::default()
            .lock_stripes(64)
            .commit_period(Duration::ZERO)
            .commit_mod_threshold(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.lock_stripes, 4096);
        assert_eq!(config.commit_period, Duration::from_secs(60));
        assert!(config.lock_timeout.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .lock_stripes(16)
            .commit_period(Duration::from_millis(50))
            .commit_mod_threshold(10)
            .redo_limit(3)
            .lock_timeout(Some(Duration::from_secs(1)))
            .default_cache_size(2);

        assert_eq!(config.lock_stripes, 16);
        assert_eq!(config.commit_period, Duration::from_millis(50));
        assert_eq!(config.commit_mod_threshold, 10);
        assert_eq!(config.redo_limit, 3);
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.default_cache_size, 2);
    }

    #[test]
    fn manual_disables_background_passes() {
        let config = Config::manual();
        assert!(config.commit_period.is_zero());
        assert_eq!(config.commit_mod_threshold, 0);
    }
}
