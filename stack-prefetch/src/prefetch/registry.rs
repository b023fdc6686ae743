//! In-process stack registry.
//!
//! Hosts without their own viewer layer register stacks here and move the
//! cursor with [`StackRegistry::set_current_index`], which broadcasts the new
//! position to subscribed triggers. Removing a stack closes its position
//! channel, which ends any trigger listening to it.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::services::{PositionEvents, StackId, StackProvider, StackSnapshot};

/// Capacity of each stack's position-change channel.
///
/// Triggers coalesce pass requests, so a lagging listener loses nothing
/// that matters.
pub const POSITION_CHANNEL_CAPACITY: usize = 16;

struct RegisteredStack {
    item_ids: Vec<String>,
    current_index: usize,
    position_tx: broadcast::Sender<usize>,
}

/// Thread-safe registry of stacks and their cursors.
#[derive(Default)]
pub struct StackRegistry {
    stacks: DashMap<StackId, RegisteredStack>,
}

impl std::fmt::Debug for StackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackRegistry")
            .field("stacks", &self.stacks.len())
            .finish()
    }
}

impl StackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a stack, with the cursor at index 0.
    ///
    /// Replacing a stack keeps existing position subscribers.
    pub fn register(&self, id: impl Into<StackId>, item_ids: Vec<String>) {
        let id = id.into();
        debug!(stack = %id, items = item_ids.len(), "Registering stack");

        match self.stacks.get_mut(&id) {
            Some(mut existing) => {
                existing.item_ids = item_ids;
                existing.current_index = 0;
            }
            None => {
                let (position_tx, _) = broadcast::channel(POSITION_CHANNEL_CAPACITY);
                self.stacks.insert(
                    id,
                    RegisteredStack {
                        item_ids,
                        current_index: 0,
                        position_tx,
                    },
                );
            }
        }
    }

    /// Move a stack's cursor and notify subscribers.
    ///
    /// Returns `false` if the stack is not registered.
    pub fn set_current_index(&self, id: &StackId, index: usize) -> bool {
        let Some(mut stack) = self.stacks.get_mut(id) else {
            return false;
        };
        stack.current_index = index;
        // No subscribers just means nobody is prefetching this stack.
        let _ = stack.position_tx.send(index);
        true
    }

    /// Remove a stack, closing its position channel.
    pub fn remove(&self, id: &StackId) -> bool {
        self.stacks.remove(id).is_some()
    }

    /// Number of live position subscribers for a stack.
    pub fn subscriber_count(&self, id: &StackId) -> usize {
        self.stacks
            .get(id)
            .map(|stack| stack.position_tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of registered stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Whether no stacks are registered.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

impl StackProvider for StackRegistry {
    fn stack(&self, id: &StackId) -> Option<StackSnapshot> {
        self.stacks
            .get(id)
            .map(|stack| StackSnapshot::new(stack.item_ids.clone(), stack.current_index))
    }
}

impl PositionEvents for StackRegistry {
    fn subscribe(&self, id: &StackId) -> Option<broadcast::Receiver<usize>> {
        self.stacks.get(id).map(|stack| stack.position_tx.subscribe())
    }
}
