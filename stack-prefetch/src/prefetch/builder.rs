//! Builder for [`StackPrefetcher`].
//!
//! Collects the host collaborators and configuration, then validates them
//! in [`build`](StackPrefetcherBuilder::build).
//!
//! # Example
//!
//! ```ignore
//! let prefetcher = StackPrefetcher::builder()
//!     .with_stack_provider(viewer.clone())
//!     .with_position_events(viewer)
//!     .with_loader(loader)
//!     .with_cache_info(cache)
//!     .with_config(PrefetchConfig::from_ini_str(&config_text)?)
//!     .build()?;
//! ```

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::config::{PrefetchConfig, SharedPrefetchConfig};
use super::error::PrefetchError;
use super::events::DEFAULT_EVENT_CHANNEL_CAPACITY;
use super::registry::StackRegistry;
use super::scheduler::{PrefetcherParts, StackPrefetcher};
use super::services::{CacheInfo, ItemLoader, PositionEvents, StackProvider};

/// Assembles a [`StackPrefetcher`] from its collaborators.
pub struct StackPrefetcherBuilder {
    stacks: Option<Arc<dyn StackProvider>>,
    loader: Option<Arc<dyn ItemLoader>>,
    cache: Option<Arc<dyn CacheInfo>>,
    positions: Option<Arc<dyn PositionEvents>>,
    config: PrefetchConfig,
    event_capacity: usize,
    runtime: Option<Handle>,
}

impl Default for StackPrefetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StackPrefetcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackPrefetcherBuilder")
            .field("has_stack_provider", &self.stacks.is_some())
            .field("has_loader", &self.loader.is_some())
            .field("has_cache_info", &self.cache.is_some())
            .field("has_position_events", &self.positions.is_some())
            .field("config", &self.config)
            .field("event_capacity", &self.event_capacity)
            .finish_non_exhaustive()
    }
}

impl StackPrefetcherBuilder {
    /// Create a builder with no collaborators and an unset ceiling.
    pub fn new() -> Self {
        Self {
            stacks: None,
            loader: None,
            cache: None,
            positions: None,
            config: PrefetchConfig::default(),
            event_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            runtime: None,
        }
    }

    /// Set the source of stack contents and cursors.
    pub fn with_stack_provider(mut self, stacks: Arc<dyn StackProvider>) -> Self {
        self.stacks = Some(stacks);
        self
    }

    /// Set the item loader.
    pub fn with_loader(mut self, loader: Arc<dyn ItemLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the cache-size oracle used for saturation detection.
    pub fn with_cache_info(mut self, cache: Arc<dyn CacheInfo>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the source of position-change notifications.
    pub fn with_position_events(mut self, positions: Arc<dyn PositionEvents>) -> Self {
        self.positions = Some(positions);
        self
    }

    /// Use a [`StackRegistry`] as both stack provider and position source.
    pub fn with_registry(self, registry: Arc<StackRegistry>) -> Self {
        let stacks: Arc<dyn StackProvider> = registry.clone();
        self.with_stack_provider(stacks).with_position_events(registry)
    }

    /// Set the initial shared configuration.
    pub fn with_config(mut self, config: PrefetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Run passes on the given runtime instead of the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate and build the prefetcher.
    ///
    /// # Errors
    ///
    /// - [`PrefetchError::MissingService`] if a collaborator was not set
    /// - [`PrefetchError::InvalidConfig`] if the configuration is out of range
    /// - [`PrefetchError::NoRuntime`] if no runtime was given and none is current
    pub fn build(self) -> Result<StackPrefetcher, PrefetchError> {
        let stacks = self
            .stacks
            .ok_or(PrefetchError::MissingService("stack provider"))?;
        let loader = self.loader.ok_or(PrefetchError::MissingService("loader"))?;
        let cache = self
            .cache
            .ok_or(PrefetchError::MissingService("cache info"))?;
        let positions = self
            .positions
            .ok_or(PrefetchError::MissingService("position events"))?;

        self.config.validate()?;
        if self.event_capacity == 0 {
            return Err(PrefetchError::InvalidConfig(
                "event channel capacity must be > 0".to_string(),
            ));
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| PrefetchError::NoRuntime)?,
        };

        let (events, _) = broadcast::channel(self.event_capacity);

        Ok(StackPrefetcher::from_parts(PrefetcherParts {
            stacks,
            loader,
            cache,
            positions,
            config: SharedPrefetchConfig::new(self.config),
            events,
            runtime,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefetch::error::LoadError;
    use crate::prefetch::services::BoxFuture;

    struct NoopLoader;

    impl ItemLoader for NoopLoader {
        fn load<'a>(&'a self, _item_id: &'a str) -> BoxFuture<'a, Result<(), LoadError>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct ZeroCache;

    impl CacheInfo for ZeroCache {
        fn size_bytes(&self) -> u64 {
            0
        }
    }

    fn complete_builder() -> StackPrefetcherBuilder {
        StackPrefetcherBuilder::new()
            .with_registry(Arc::new(StackRegistry::new()))
            .with_loader(Arc::new(NoopLoader))
            .with_cache_info(Arc::new(ZeroCache))
    }

    #[tokio::test]
    async fn test_build_with_registry() {
        let prefetcher = complete_builder()
            .with_config(PrefetchConfig::new().with_max_simultaneous_requests(4))
            .build()
            .unwrap();

        assert_eq!(
            prefetcher.configuration().max_simultaneous_requests,
            Some(4)
        );
        assert_eq!(prefetcher.stack_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_loader() {
        let result = StackPrefetcherBuilder::new()
            .with_registry(Arc::new(StackRegistry::new()))
            .with_cache_info(Arc::new(ZeroCache))
            .build();

        assert!(matches!(result, Err(PrefetchError::MissingService("loader"))));
    }

    #[tokio::test]
    async fn test_missing_position_events() {
        let result = StackPrefetcherBuilder::new()
            .with_stack_provider(Arc::new(StackRegistry::new()))
            .with_loader(Arc::new(NoopLoader))
            .with_cache_info(Arc::new(ZeroCache))
            .build();

        assert!(matches!(
            result,
            Err(PrefetchError::MissingService("position events"))
        ));
    }

    #[tokio::test]
    async fn test_rejects_zero_ceiling() {
        let result = complete_builder()
            .with_config(PrefetchConfig::new().with_max_simultaneous_requests(0))
            .build();

        assert!(matches!(result, Err(PrefetchError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_rejects_zero_event_capacity() {
        let result = complete_builder().with_event_capacity(0).build();
        assert!(matches!(result, Err(PrefetchError::InvalidConfig(_))));
    }

    #[test]
    fn test_no_runtime() {
        let result = complete_builder().build();
        assert!(matches!(result, Err(PrefetchError::NoRuntime)));
    }

    #[test]
    fn test_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let result = complete_builder()
            .with_runtime(runtime.handle().clone())
            .build();
        assert!(result.is_ok());
    }
}
