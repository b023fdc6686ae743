//! Configuration for stack prefetching.
//!
//! A single [`PrefetchConfig`] value is shared by every stack a
//! [`StackPrefetcher`](super::StackPrefetcher) schedules. It is held in a
//! [`SharedPrefetchConfig`], where the last write wins. Callers that need
//! per-stack isolation pass an explicit config to
//! [`enable_with`](super::StackPrefetcher::enable_with).

use std::sync::Arc;

use ini::Ini;
use parking_lot::RwLock;

use super::error::PrefetchError;

// ==================== Defaults ====================

/// Floor for the derived concurrency ceiling.
///
/// Keeps the loader backend from being flooded on short stacks while still
/// fetching a useful batch.
pub const DEFAULT_MAX_SIMULTANEOUS_REQUESTS: usize = 11;

/// Stack length divisor used when deriving the ceiling for long stacks.
pub const STACK_LENGTH_DIVISOR: usize = 5;

/// Section name read by [`PrefetchConfig::from_ini_str`].
pub const CONFIG_SECTION: &str = "prefetch";

/// Key for the concurrency ceiling inside [`CONFIG_SECTION`].
pub const MAX_SIMULTANEOUS_REQUESTS_KEY: &str = "max_simultaneous_requests";

/// Derive the default concurrency ceiling for a stack of `stack_len` items.
///
/// `max(ceil(stack_len / 5), 11)`.
pub fn default_max_requests(stack_len: usize) -> usize {
    stack_len
        .div_ceil(STACK_LENGTH_DIVISOR)
        .max(DEFAULT_MAX_SIMULTANEOUS_REQUESTS)
}

/// Prefetch configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Ceiling on concurrent in-flight loads per batch.
    ///
    /// `None` means "derive from the stack length on first enable".
    pub max_simultaneous_requests: Option<usize>,
}

impl PrefetchConfig {
    /// Create an unset configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency ceiling.
    pub fn with_max_simultaneous_requests(mut self, max: usize) -> Self {
        self.max_simultaneous_requests = Some(max);
        self
    }

    /// Ceiling to use for a stack of `stack_len` items.
    pub fn effective_ceiling(&self, stack_len: usize) -> usize {
        self.max_simultaneous_requests
            .unwrap_or_else(|| default_max_requests(stack_len))
    }

    /// Reject a zero ceiling.
    pub fn validate(&self) -> Result<(), PrefetchError> {
        match self.max_simultaneous_requests {
            Some(0) => Err(PrefetchError::InvalidConfig(format!(
                "{} must be greater than zero",
                MAX_SIMULTANEOUS_REQUESTS_KEY
            ))),
            _ => Ok(()),
        }
    }

    /// Parse the `[prefetch]` section of an INI document.
    ///
    /// A missing section or key leaves the ceiling unset.
    ///
    /// ```
    /// use stack_prefetch::prefetch::PrefetchConfig;
    ///
    /// let config = PrefetchConfig::from_ini_str("[prefetch]\nmax_simultaneous_requests = 4\n")
    ///     .unwrap();
    /// assert_eq!(config.max_simultaneous_requests, Some(4));
    /// ```
    pub fn from_ini_str(source: &str) -> Result<Self, PrefetchError> {
        let ini = Ini::load_from_str(source)?;
        let mut config = Self::new();

        if let Some(raw) = ini
            .section(Some(CONFIG_SECTION))
            .and_then(|section| section.get(MAX_SIMULTANEOUS_REQUESTS_KEY))
        {
            let max = raw.trim().parse::<usize>().map_err(|_| {
                PrefetchError::InvalidConfig(format!(
                    "{} is not a positive integer: {:?}",
                    MAX_SIMULTANEOUS_REQUESTS_KEY, raw
                ))
            })?;
            config.max_simultaneous_requests = Some(max);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Configuration shared by every stack on one prefetcher.
///
/// Writes replace the whole value, so concurrent writers never observe a
/// partial update. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SharedPrefetchConfig {
    inner: Arc<RwLock<PrefetchConfig>>,
}

impl SharedPrefetchConfig {
    /// Wrap an initial configuration.
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Current configuration (snapshot).
    pub fn get(&self) -> PrefetchConfig {
        *self.inner.read()
    }

    /// Replace the configuration.
    pub fn set(&self, config: PrefetchConfig) -> Result<(), PrefetchError> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }

    /// Return the ceiling, deriving and storing a default if unset.
    pub fn ceiling_or_init(&self, stack_len: usize) -> usize {
        if let Some(max) = self.inner.read().max_simultaneous_requests {
            return max;
        }

        let mut config = self.inner.write();
        // Another stack may have won the race between the two locks.
        let max = config.effective_ceiling(stack_len);
        config.max_simultaneous_requests = Some(max);
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_requests_floor() {
        assert_eq!(default_max_requests(0), 11);
        assert_eq!(default_max_requests(1), 11);
        assert_eq!(default_max_requests(20), 11);
        assert_eq!(default_max_requests(55), 11);
    }

    #[test]
    fn test_default_max_requests_scales_with_length() {
        // ceil(56 / 5) = 12
        assert_eq!(default_max_requests(56), 12);
        assert_eq!(default_max_requests(500), 100);
        assert_eq!(default_max_requests(501), 101);
    }

    #[test]
    fn test_config_default_is_unset() {
        let config = PrefetchConfig::default();
        assert_eq!(config.max_simultaneous_requests, None);
        assert_eq!(config.effective_ceiling(20), DEFAULT_MAX_SIMULTANEOUS_REQUESTS);
    }

    #[test]
    fn test_effective_ceiling_prefers_explicit() {
        let config = PrefetchConfig::new().with_max_simultaneous_requests(3);
        assert_eq!(config.effective_ceiling(1000), 3);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = PrefetchConfig::new().with_max_simultaneous_requests(0);
        assert!(matches!(
            config.validate(),
            Err(PrefetchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_ini_str() {
        let config =
            PrefetchConfig::from_ini_str("[prefetch]\nmax_simultaneous_requests = 7\n").unwrap();
        assert_eq!(config.max_simultaneous_requests, Some(7));
    }

    #[test]
    fn test_from_ini_str_missing_section() {
        let config = PrefetchConfig::from_ini_str("[cache]\nsize = 10\n").unwrap();
        assert_eq!(config, PrefetchConfig::default());
    }

    #[test]
    fn test_from_ini_str_rejects_garbage() {
        let result = PrefetchConfig::from_ini_str("[prefetch]\nmax_simultaneous_requests = lots\n");
        assert!(matches!(result, Err(PrefetchError::InvalidConfig(_))));

        let result = PrefetchConfig::from_ini_str("[prefetch]\nmax_simultaneous_requests = 0\n");
        assert!(matches!(result, Err(PrefetchError::InvalidConfig(_))));
    }

    #[test]
    fn test_shared_config_last_write_wins() {
        let shared = SharedPrefetchConfig::default();
        let other = shared.clone();

        shared
            .set(PrefetchConfig::new().with_max_simultaneous_requests(4))
            .unwrap();
        other
            .set(PrefetchConfig::new().with_max_simultaneous_requests(9))
            .unwrap();

        assert_eq!(shared.get().max_simultaneous_requests, Some(9));
    }

    #[test]
    fn test_shared_config_rejects_invalid() {
        let shared = SharedPrefetchConfig::new(PrefetchConfig::new().with_max_simultaneous_requests(5));
        assert!(shared
            .set(PrefetchConfig::new().with_max_simultaneous_requests(0))
            .is_err());
        assert_eq!(shared.get().max_simultaneous_requests, Some(5));
    }

    #[test]
    fn test_ceiling_or_init_derives_once() {
        let shared = SharedPrefetchConfig::default();

        assert_eq!(shared.ceiling_or_init(100), 20);
        // Already set: a later, longer stack does not change it.
        assert_eq!(shared.ceiling_or_init(1000), 20);
        assert_eq!(shared.get().max_simultaneous_requests, Some(20));
    }

    #[test]
    fn test_ceiling_or_init_keeps_explicit_value() {
        let shared = SharedPrefetchConfig::new(PrefetchConfig::new().with_max_simultaneous_requests(3));

        assert_eq!(shared.ceiling_or_init(1000), 3);
        assert_eq!(shared.get().max_simultaneous_requests, Some(3));
    }
}
