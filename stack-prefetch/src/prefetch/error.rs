//! Error types for the stack prefetcher.
//!
//! Item-level load failures never propagate out of a pass; they are recorded
//! and broadcast as [`PrefetchEvent`](super::PrefetchEvent)s. The errors here
//! cover configuration and construction, which callers must handle.

use thiserror::Error;

/// Errors returned by the prefetcher's public API.
#[derive(Debug, Error)]
pub enum PrefetchError {
    /// A configuration value is out of range.
    #[error("Invalid prefetch configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be parsed.
    #[error("Failed to parse prefetch configuration: {0}")]
    Config(#[from] ini::ParseError),

    /// The prefetcher was built outside a Tokio runtime.
    #[error("No Tokio runtime available to drive prefetch passes")]
    NoRuntime,

    /// A required collaborator was not supplied to the builder.
    #[error("Missing prefetch service: {0}")]
    MissingService(&'static str),
}

/// Failure reported by an [`ItemLoader`](super::ItemLoader) for one item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LoadError(pub String);

impl LoadError {
    /// Create a load error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
