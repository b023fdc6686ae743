//! Stack prefetching.
//!
//! Loads the items of an ordered stack (for example the images of a series)
//! ahead of the viewer so that scrolling hits a warm cache. Work is issued
//! in batches no larger than a configurable concurrency ceiling, starting at
//! the stack's current cursor.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──enable──► Active ◄──enable / position change──┐
//!                     │  │                               │
//!             disable │  │ saturation                    │
//!                     ▼  ▼                               │
//!                    Paused ─────────────────────────────┘
//!
//!   Active ──all items loaded──► Complete ──enable──► (stays Complete)
//! ```
//!
//! A prefetch session ends when every item is loaded, when the cache stops
//! growing between samples (saturation), or when the host calls `disable`.
//! Moving the cursor re-arms a paused stack.
//!
//! # Host Integration
//!
//! The prefetcher talks to the host through four traits:
//!
//! - [`StackProvider`] - item ids and cursor of a stack
//! - [`ItemLoader`] - fetch one item into the cache
//! - [`CacheInfo`] - current cache size in bytes
//! - [`PositionEvents`] - cursor change notifications
//!
//! [`StackRegistry`] implements the first and last for hosts without their
//! own viewer layer.

mod builder;
mod config;
mod error;
mod events;
mod registry;
mod saturation;
mod scheduler;
mod services;
mod state;
mod trigger;
mod window;

pub use builder::StackPrefetcherBuilder;
pub use config::{
    default_max_requests, PrefetchConfig, SharedPrefetchConfig, CONFIG_SECTION,
    DEFAULT_MAX_SIMULTANEOUS_REQUESTS, MAX_SIMULTANEOUS_REQUESTS_KEY, STACK_LENGTH_DIVISOR,
};
pub use error::{LoadError, PrefetchError};
pub use events::{PassOutcome, PrefetchEvent, DEFAULT_EVENT_CHANNEL_CAPACITY};
pub use registry::{StackRegistry, POSITION_CHANNEL_CAPACITY};
pub use saturation::{Sample, SaturationMonitor};
pub use scheduler::StackPrefetcher;
pub use services::{
    BoxFuture, CacheInfo, ItemLoader, PositionEvents, StackId, StackProvider, StackSnapshot,
};
pub use state::{PrefetchPhase, PrefetchState, PrefetchStatus};
pub use trigger::TriggerBinding;
pub use window::{batch_window, initial_indices};
