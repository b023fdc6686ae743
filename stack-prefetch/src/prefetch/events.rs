//! Signals broadcast by the prefetcher.
//!
//! Item and batch failures are reported here instead of being returned to a
//! caller, since passes run on background tasks. Subscribe with
//! [`StackPrefetcher::subscribe_events`](super::StackPrefetcher::subscribe_events).

use std::fmt;
use std::ops::Range;

use super::services::StackId;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How a scheduling pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The stack has no data registered (or it is empty).
    NoStackData,

    /// Prefetching was never enabled for the stack.
    NoPrefetchState,

    /// Nothing is pending; the stack is fully loaded.
    Complete,

    /// Prefetching is switched off; nothing was requested.
    Disabled,

    /// The batch ran and another pass should follow.
    Continue,

    /// The batch ran and prefetching is now off (disabled, saturated, or done).
    Stopped,

    /// Every load in the batch failed.
    BatchFailed,
}

impl PassOutcome {
    /// Whether the driver should chain another pass.
    pub fn should_continue(&self) -> bool {
        matches!(self, PassOutcome::Continue)
    }

    /// Get a short description for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::NoStackData => "no stack data",
            PassOutcome::NoPrefetchState => "no prefetch state",
            PassOutcome::Complete => "complete",
            PassOutcome::Disabled => "disabled",
            PassOutcome::Continue => "continue",
            PassOutcome::Stopped => "stopped",
            PassOutcome::BatchFailed => "batch failed",
        }
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something that happened while prefetching a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEvent {
    /// A pass is about to request `window`.
    PassStarted { stack: StackId, window: Range<usize> },

    /// One item loaded successfully.
    ItemLoaded {
        stack: StackId,
        index: usize,
        cache_size_bytes: u64,
    },

    /// One item failed to load; its index stays pending.
    LoadFailure {
        stack: StackId,
        index: usize,
        item_id: String,
        reason: String,
    },

    /// The cache stopped growing between two samples; prefetching was switched off.
    Saturated { stack: StackId, cache_size_bytes: u64 },

    /// The last pending item loaded.
    Completed { stack: StackId },

    /// Every load in a pass failed.
    BatchFailure { stack: StackId, attempted: usize },

    /// A pass ended.
    PassFinished { stack: StackId, outcome: PassOutcome },
}

impl PrefetchEvent {
    /// Stack the event belongs to.
    pub fn stack(&self) -> &StackId {
        match self {
            PrefetchEvent::PassStarted { stack, .. }
            | PrefetchEvent::ItemLoaded { stack, .. }
            | PrefetchEvent::LoadFailure { stack, .. }
            | PrefetchEvent::Saturated { stack, .. }
            | PrefetchEvent::Completed { stack }
            | PrefetchEvent::BatchFailure { stack, .. }
            | PrefetchEvent::PassFinished { stack, .. } => stack,
        }
    }
}
