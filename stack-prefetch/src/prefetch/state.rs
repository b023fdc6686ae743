//! Per-stack prefetch state.
//!
//! # State Machine
//!
//! ```text
//! Idle (no state) --enable--> Active (enabled, pending > 0)
//! Active --disable / saturation--> Paused (disabled, pending > 0)
//! Paused --enable / position change--> Active
//! Active --last pending index loaded--> Complete (disabled, pending == 0)
//! ```
//!
//! The state never reports `enabled` with an empty pending set: arming a
//! complete state is a no-op and removing the last pending index disables it.

use std::collections::HashSet;
use std::fmt;

use super::events::PassOutcome;
use super::window::initial_indices;

/// Lifecycle phase of a stack's prefetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchPhase {
    /// No prefetch state exists for the stack.
    Idle,

    /// Items remain and prefetching is switched on.
    ///
    /// A batch in which every load failed leaves the stack `Active` with no
    /// pass running until the cursor moves or `enable` is called again. Check
    /// [`PrefetchStatus::last_outcome`] to tell the two apart.
    Active,

    /// Items remain but prefetching is switched off (disabled or cache full).
    Paused,

    /// Every item has been loaded.
    Complete,
}

impl PrefetchPhase {
    /// Get a short description for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefetchPhase::Idle => "Idle",
            PrefetchPhase::Active => "Active",
            PrefetchPhase::Paused => "Paused",
            PrefetchPhase::Complete => "Complete",
        }
    }

    /// Whether passes may still be scheduled.
    pub fn is_active(&self) -> bool {
        matches!(self, PrefetchPhase::Active)
    }
}

impl fmt::Display for PrefetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable prefetch record for one stack.
#[derive(Debug, Clone)]
pub struct PrefetchState {
    pending: HashSet<usize>,
    total: usize,
    enabled: bool,
    ceiling_override: Option<usize>,
}

impl PrefetchState {
    /// Seed state for a stack of `stack_len` items, every index pending.
    pub fn new(stack_len: usize) -> Self {
        Self {
            pending: initial_indices(stack_len).collect(),
            total: stack_len,
            enabled: stack_len > 0,
            ceiling_override: None,
        }
    }

    /// Indices not yet loaded.
    pub fn pending(&self) -> &HashSet<usize> {
        &self.pending
    }

    /// Pending indices in ascending order.
    pub fn pending_sorted(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.pending.iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Stack length the state was seeded with.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of pending indices.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether prefetching should continue.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether every index has been loaded.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Re-enable prefetching if anything is left to load.
    ///
    /// Returns the resulting `enabled` flag.
    pub fn arm(&mut self) -> bool {
        self.enabled = !self.pending.is_empty();
        self.enabled
    }

    /// Switch prefetching off, keeping the pending set for a later resume.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Record a successful load.
    ///
    /// Removing an index that is not pending is a no-op. Returns `true` if
    /// this call loaded the last pending index.
    pub fn mark_loaded(&mut self, index: usize) -> bool {
        if !self.pending.remove(&index) {
            return false;
        }
        if self.pending.is_empty() {
            self.enabled = false;
            return true;
        }
        false
    }

    /// Per-stack concurrency ceiling, if one was supplied to `enable_with`.
    pub fn ceiling_override(&self) -> Option<usize> {
        self.ceiling_override
    }

    /// Set or clear the per-stack ceiling.
    pub fn set_ceiling_override(&mut self, ceiling: Option<usize>) {
        self.ceiling_override = ceiling;
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> PrefetchPhase {
        match (self.pending.is_empty(), self.enabled) {
            (true, _) => PrefetchPhase::Complete,
            (false, true) => PrefetchPhase::Active,
            (false, false) => PrefetchPhase::Paused,
        }
    }
}

/// Point-in-time view of a stack's prefetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchStatus {
    /// Indices still to load.
    pub pending: usize,
    /// Total items in the stack when prefetching was first enabled.
    pub total: usize,
    /// Whether prefetching is switched on.
    pub enabled: bool,
    /// Whether the position-change trigger is bound.
    pub trigger_bound: bool,
    /// Per-stack ceiling override, if any.
    pub ceiling_override: Option<usize>,
    /// Lifecycle phase.
    pub phase: PrefetchPhase,
    /// Passes that reached the loading step.
    pub passes: u64,
    /// How the most recent pass ended, if any has run.
    pub last_outcome: Option<PassOutcome>,
}

impl PrefetchStatus {
    /// Items loaded so far.
    pub fn loaded(&self) -> usize {
        self.total.saturating_sub(self.pending)
    }

    /// Progress as a fraction from 0.0 to 1.0.
    pub fn progress_fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.loaded() as f64 / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_as_str() {
        assert_eq!(PrefetchPhase::Idle.as_str(), "Idle");
        assert_eq!(PrefetchPhase::Active.as_str(), "Active");
        assert_eq!(PrefetchPhase::Paused.as_str(), "Paused");
        assert_eq!(format!("{}", PrefetchPhase::Complete), "Complete");
    }

    #[test]
    fn test_phase_is_active() {
        assert!(PrefetchPhase::Active.is_active());
        assert!(!PrefetchPhase::Paused.is_active());
        assert!(!PrefetchPhase::Complete.is_active());
        assert!(!PrefetchPhase::Idle.is_active());
    }

    #[test]
    fn test_new_state_has_every_index_pending() {
        let state = PrefetchState::new(5);
        assert_eq!(state.pending_sorted(), vec![0, 1, 2, 3, 4]);
        assert!(state.is_enabled());
        assert_eq!(state.phase(), PrefetchPhase::Active);
    }

    #[test]
    fn test_empty_stack_state_is_complete() {
        let state = PrefetchState::new(0);
        assert!(!state.is_enabled());
        assert_eq!(state.phase(), PrefetchPhase::Complete);
    }

    #[test]
    fn test_mark_loaded_removes_index() {
        let mut state = PrefetchState::new(3);
        assert!(!state.mark_loaded(1));
        assert_eq!(state.pending_sorted(), vec![0, 2]);
    }

    #[test]
    fn test_mark_loaded_absent_index_is_noop() {
        let mut state = PrefetchState::new(3);
        state.mark_loaded(1);
        assert!(!state.mark_loaded(1));
        assert!(!state.mark_loaded(99));
        assert_eq!(state.pending_len(), 2);
    }

    #[test]
    fn test_last_load_disables() {
        let mut state = PrefetchState::new(2);
        state.mark_loaded(0);
        assert!(state.is_enabled());
        assert!(state.mark_loaded(1));
        assert!(!state.is_enabled());
        assert_eq!(state.phase(), PrefetchPhase::Complete);
    }

    #[test]
    fn test_arm_does_not_enable_complete_state() {
        let mut state = PrefetchState::new(1);
        state.mark_loaded(0);
        assert!(!state.arm());
        assert!(!state.is_enabled());
    }

    #[test]
    fn test_disable_keeps_pending() {
        let mut state = PrefetchState::new(4);
        state.mark_loaded(2);
        state.disable();
        assert_eq!(state.phase(), PrefetchPhase::Paused);
        assert_eq!(state.pending_sorted(), vec![0, 1, 3]);

        assert!(state.arm());
        assert_eq!(state.pending_sorted(), vec![0, 1, 3]);
    }

    #[test]
    fn test_status_progress() {
        let status = PrefetchStatus {
            pending: 5,
            total: 20,
            enabled: true,
            trigger_bound: true,
            ceiling_override: None,
            phase: PrefetchPhase::Active,
            passes: 1,
            last_outcome: Some(PassOutcome::Continue),
        };
        assert_eq!(status.loaded(), 15);
        assert!((status.progress_fraction() - 0.75).abs() < f64::EPSILON);
    }
}
