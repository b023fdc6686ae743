//! Stack Prefetch - bounded-concurrency prefetching for image stacks
//!
//! This library loads the items of an ordered stack ahead of a viewer's
//! cursor, in batches capped by a concurrency ceiling, and stops when the
//! stack is fully loaded, the cache stops growing, or the host disables it.
//!
//! See [`prefetch`] for the lifecycle and host integration traits.

pub mod logging;
pub mod prefetch;

pub use prefetch::{
    CacheInfo, ItemLoader, LoadError, PositionEvents, PrefetchConfig, PrefetchError,
    PrefetchEvent, PrefetchPhase, PrefetchStatus, StackId, StackPrefetcher,
    StackPrefetcherBuilder, StackProvider, StackRegistry, StackSnapshot,
};
