//! Interfaces to the collaborators the prefetcher drives.
//!
//! The prefetcher owns none of these. The host supplies:
//!
//! - [`StackProvider`]: the viewer's stacks (item identifiers and cursor)
//! - [`ItemLoader`]: loads one item into the host's cache
//! - [`CacheInfo`]: reports the cache's size after each load
//! - [`PositionEvents`]: notifies when a stack's cursor moves
//!
//! # Dyn Compatibility
//!
//! Async methods return [`BoxFuture`] so every collaborator can be held as
//! `Arc<dyn Trait>`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use super::error::LoadError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identity of a stack (typically the viewer element that displays it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId(String);

impl StackId {
    /// Create a stack identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Read-only view of a stack at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    /// Item identifiers in display order.
    pub item_ids: Vec<String>,
    /// Index of the item the viewer is showing.
    pub current_index: usize,
}

impl StackSnapshot {
    /// Create a snapshot.
    pub fn new(item_ids: Vec<String>, current_index: usize) -> Self {
        Self {
            item_ids,
            current_index,
        }
    }

    /// Number of items in the stack.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether the stack has no items.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// Source of stack data.
pub trait StackProvider: Send + Sync {
    /// Current snapshot of a stack, or `None` if none is registered.
    fn stack(&self, id: &StackId) -> Option<StackSnapshot>;
}

/// Loads a single item into the host's cache.
///
/// Loading an item that is already cached should be cheap; the prefetcher
/// re-requests its whole window each pass.
pub trait ItemLoader: Send + Sync {
    /// Load and cache one item.
    fn load<'a>(&'a self, item_id: &'a str) -> BoxFuture<'a, Result<(), LoadError>>;
}

/// Reports the size of the host's item cache.
pub trait CacheInfo: Send + Sync {
    /// Current cache size in bytes.
    fn size_bytes(&self) -> u64;
}

/// Position-change notifications for stacks.
///
/// Each message carries the stack's new current index. Dropping the receiver
/// unsubscribes.
pub trait PositionEvents: Send + Sync {
    /// Subscribe to a stack's cursor changes, or `None` if the stack is unknown.
    fn subscribe(&self, id: &StackId) -> Option<broadcast::Receiver<usize>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_id_display() {
        let id = StackId::new("viewport-1");
        assert_eq!(id.to_string(), "viewport-1");
        assert_eq!(id.as_str(), "viewport-1");
        assert_eq!(StackId::from("viewport-1"), id);
    }

    #[test]
    fn test_snapshot_len() {
        let snapshot = StackSnapshot::new(vec!["a".into(), "b".into()], 1);
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.is_empty());
        assert!(StackSnapshot::new(Vec::new(), 0).is_empty());
    }
}
