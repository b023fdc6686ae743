//! Stack prefetch scheduler.
//!
//! Loads the items of a stack ahead of the viewer's cursor in bounded
//! batches, until every item is loaded, the cache stops growing, or the
//! stack is disabled.
//!
//! # Architecture
//!
//! ```text
//!  enable ──► PrefetchState ──► TriggerBinding ◄── position changes
//!                  │                   │
//!                  ▼                   ▼
//!             request_pass ◄───────────┘
//!                  │
//!                  ▼
//!          ┌───────────────┐   one driver task per stack,
//!          │    driver     │   at most one pass at a time
//!          └───────┬───────┘
//!                  ▼
//!          ┌───────────────┐   window = cursor .. cursor + ceiling
//!          │   run_pass    │──► ItemLoader (fan-out, FuturesUnordered)
//!          └───────┬───────┘──► CacheInfo (saturation check per load)
//!                  ▼
//!     Continue ─► yield, next pass      otherwise ─► driver exits
//! ```
//!
//! # Pass Coalescing
//!
//! Each stack has a `pass_requested` flag and a `driver_running` flag.
//! Requests that arrive while a pass is in flight only set the flag; the
//! running driver picks them up as a single follow-up pass. Chained passes
//! yield to the runtime first, so `disable` and position changes are observed
//! between batches.
//!
//! # Saturation
//!
//! The driver owns one [`SaturationMonitor`] for as long as it keeps chaining
//! passes, so the cache-size baseline carries from one pass to the next. A
//! one-item window therefore saturates on its second pass. `enable` and
//! position changes mark the stack re-armed, which resets the baseline
//! before the next pass.
//!
//! # Cancellation
//!
//! `disable` never cancels in-flight loads. Their completions still remove
//! indices from the pending set, but no further pass is chained.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::builder::StackPrefetcherBuilder;
use super::config::{PrefetchConfig, SharedPrefetchConfig};
use super::error::{LoadError, PrefetchError};
use super::events::{PassOutcome, PrefetchEvent};
use super::saturation::{Sample, SaturationMonitor};
use super::services::{CacheInfo, ItemLoader, PositionEvents, StackId, StackProvider};
use super::state::{PrefetchPhase, PrefetchState, PrefetchStatus};
use super::trigger::TriggerBinding;
use super::window::batch_window;

/// Collaborators a prefetcher is assembled from.
pub(super) struct PrefetcherParts {
    pub stacks: Arc<dyn StackProvider>,
    pub loader: Arc<dyn ItemLoader>,
    pub cache: Arc<dyn CacheInfo>,
    pub positions: Arc<dyn PositionEvents>,
    pub config: SharedPrefetchConfig,
    pub events: broadcast::Sender<PrefetchEvent>,
    pub runtime: Handle,
}

/// Everything the prefetcher tracks for one stack.
struct StackEntry {
    id: StackId,
    state: Mutex<PrefetchState>,
    trigger: TriggerBinding,
    driver_running: AtomicBool,
    pass_requested: AtomicBool,
    rearmed: AtomicBool,
    passes: AtomicU64,
    last_outcome: Mutex<Option<PassOutcome>>,
}

impl StackEntry {
    fn new(id: StackId, state: PrefetchState) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            trigger: TriggerBinding::new(),
            driver_running: AtomicBool::new(false),
            pass_requested: AtomicBool::new(false),
            rearmed: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
        }
    }
}

struct PrefetcherInner {
    stacks: Arc<dyn StackProvider>,
    loader: Arc<dyn ItemLoader>,
    cache: Arc<dyn CacheInfo>,
    positions: Arc<dyn PositionEvents>,
    config: SharedPrefetchConfig,
    entries: DashMap<StackId, Arc<StackEntry>>,
    events: broadcast::Sender<PrefetchEvent>,
    runtime: Handle,
}

/// Bounded-concurrency prefetcher for image stacks.
///
/// Cheap to clone; clones share the same stacks and configuration.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(StackRegistry::new());
/// registry.register("viewport-1", image_ids);
///
/// let prefetcher = StackPrefetcher::builder()
///     .with_registry(Arc::clone(&registry))
///     .with_loader(loader)
///     .with_cache_info(cache)
///     .build()?;
///
/// prefetcher.enable(&StackId::new("viewport-1"));
/// ```
#[derive(Clone)]
pub struct StackPrefetcher {
    inner: Arc<PrefetcherInner>,
}

impl std::fmt::Debug for StackPrefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackPrefetcher")
            .field("config", &self.inner.config.get())
            .field("stacks", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}

impl StackPrefetcher {
    /// Start building a prefetcher.
    pub fn builder() -> StackPrefetcherBuilder {
        StackPrefetcherBuilder::new()
    }

    pub(super) fn from_parts(parts: PrefetcherParts) -> Self {
        Self {
            inner: Arc::new(PrefetcherInner {
                stacks: parts.stacks,
                loader: parts.loader,
                cache: parts.cache,
                positions: parts.positions,
                config: parts.config,
                entries: DashMap::new(),
                events: parts.events,
                runtime: parts.runtime,
            }),
        }
    }

    /// Start (or resume) prefetching a stack.
    ///
    /// The first call for a stack seeds every index as pending; it is a
    /// no-op if the stack has no items. Later calls re-arm the existing
    /// state. Either way the position trigger is bound and a pass is
    /// scheduled.
    pub fn enable(&self, stack: &StackId) {
        self.inner.activate(stack, None);
    }

    /// Like [`enable`](Self::enable), with a per-stack concurrency ceiling.
    ///
    /// An unset ceiling in `config` leaves the stack on the shared value.
    pub fn enable_with(&self, stack: &StackId, config: PrefetchConfig) -> Result<(), PrefetchError> {
        config.validate()?;
        self.inner.activate(stack, config.max_simultaneous_requests);
        Ok(())
    }

    /// Stop prefetching a stack.
    ///
    /// Unbinds the position trigger and switches the stack off. Pending
    /// indices are kept so a later `enable` resumes where this left off.
    /// No-op if the stack was never enabled.
    pub fn disable(&self, stack: &StackId) {
        let Some(entry) = self.inner.entry(stack) else {
            debug!(stack = %stack, "No prefetch state, nothing to disable");
            return;
        };

        entry.trigger.unbind();
        let pending = {
            let mut state = entry.state.lock();
            state.disable();
            state.pending_len()
        };
        info!(stack = %stack, pending, "Stack prefetch disabled");
    }

    /// Drop all prefetch state for a stack (stack teardown).
    ///
    /// Returns `false` if the stack was never enabled.
    pub fn forget(&self, stack: &StackId) -> bool {
        let Some((_, entry)) = self.inner.entries.remove(stack) else {
            return false;
        };
        entry.trigger.unbind();
        entry.state.lock().disable();
        debug!(stack = %stack, "Stack prefetch state removed");
        true
    }

    /// Current shared configuration.
    pub fn configuration(&self) -> PrefetchConfig {
        self.inner.config.get()
    }

    /// Replace the shared configuration. Last write wins.
    pub fn set_configuration(&self, config: PrefetchConfig) -> Result<(), PrefetchError> {
        self.inner.config.set(config)
    }

    /// Snapshot of a stack's prefetching, or `None` if never enabled.
    pub fn status(&self, stack: &StackId) -> Option<PrefetchStatus> {
        let entry = self.inner.entry(stack)?;
        let state = entry.state.lock();
        let status = PrefetchStatus {
            pending: state.pending_len(),
            total: state.total(),
            enabled: state.is_enabled(),
            trigger_bound: entry.trigger.is_bound(),
            ceiling_override: state.ceiling_override(),
            phase: state.phase(),
            passes: entry.passes.load(Ordering::Relaxed),
            last_outcome: *entry.last_outcome.lock(),
        };
        Some(status)
    }

    /// Lifecycle phase of a stack.
    pub fn phase(&self, stack: &StackId) -> PrefetchPhase {
        self.inner
            .entry(stack)
            .map(|entry| entry.state.lock().phase())
            .unwrap_or(PrefetchPhase::Idle)
    }

    /// Pending indices in ascending order, or `None` if never enabled.
    pub fn pending_indices(&self, stack: &StackId) -> Option<Vec<usize>> {
        self.inner
            .entry(stack)
            .map(|entry| entry.state.lock().pending_sorted())
    }

    /// Subscribe to prefetch events for all stacks.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PrefetchEvent> {
        self.inner.events.subscribe()
    }

    /// Number of stacks with prefetch state.
    pub fn stack_count(&self) -> usize {
        self.inner.entries.len()
    }

    #[cfg(test)]
    async fn run_pass_for(&self, stack: &StackId) -> PassOutcome {
        if self.inner.stacks.stack(stack).filter(|s| !s.is_empty()).is_none() {
            return PassOutcome::NoStackData;
        }
        match self.inner.entry(stack) {
            Some(entry) => {
                let mut monitor = SaturationMonitor::new();
                self.inner.run_pass(&entry, &mut monitor).await
            }
            None => PassOutcome::NoPrefetchState,
        }
    }
}

impl PrefetcherInner {
    fn entry(&self, stack: &StackId) -> Option<Arc<StackEntry>> {
        self.entries.get(stack).map(|entry| Arc::clone(entry.value()))
    }

    fn activate(self: &Arc<Self>, id: &StackId, ceiling_override: Option<usize>) {
        let existing = self.entry(id);
        let entry = match existing {
            Some(entry) => {
                let (armed, pending) = {
                    let mut state = entry.state.lock();
                    if ceiling_override.is_some() {
                        state.set_ceiling_override(ceiling_override);
                    }
                    (state.arm(), state.pending_len())
                };
                info!(stack = %id, pending, armed, "Stack prefetch re-enabled");
                entry
            }
            None => {
                let Some(stack) = self.stacks.stack(id).filter(|stack| !stack.is_empty()) else {
                    debug!(stack = %id, "No stack data, prefetch not enabled");
                    return;
                };

                let ceiling = self.config.ceiling_or_init(stack.len());
                let mut state = PrefetchState::new(stack.len());
                state.set_ceiling_override(ceiling_override);

                let fresh = Arc::new(StackEntry::new(id.clone(), state));
                let entry = Arc::clone(self.entries.entry(id.clone()).or_insert(fresh).value());
                info!(
                    stack = %id,
                    items = stack.len(),
                    ceiling = ceiling_override.unwrap_or(ceiling),
                    "Stack prefetch enabled"
                );
                entry
            }
        };

        entry.rearmed.store(true, Ordering::SeqCst);
        self.bind_trigger(&entry);
        self.request_pass(&entry);
    }

    fn bind_trigger(self: &Arc<Self>, entry: &Arc<StackEntry>) {
        let inner = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(entry);

        let bound = entry.trigger.bind(
            &entry.id,
            self.positions.as_ref(),
            &self.runtime,
            move |index| {
                let (Some(inner), Some(entry)) = (inner.upgrade(), weak_entry.upgrade()) else {
                    return;
                };
                inner.on_position_changed(&entry, index);
            },
        );

        if bound {
            debug!(stack = %entry.id, "Position trigger bound");
        }
    }

    fn on_position_changed(self: &Arc<Self>, entry: &Arc<StackEntry>, index: usize) {
        // A disable may have raced this event.
        if !entry.trigger.is_bound() {
            return;
        }

        let armed = entry.state.lock().arm();
        entry.rearmed.store(true, Ordering::SeqCst);
        info!(
            stack = %entry.id,
            current_index = index,
            armed,
            "Current position changed, re-enabling prefetch"
        );
        self.request_pass(entry);
    }

    fn request_pass(self: &Arc<Self>, entry: &Arc<StackEntry>) {
        entry.pass_requested.store(true, Ordering::SeqCst);
        if entry
            .driver_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = Arc::clone(self);
            let entry = Arc::clone(entry);
            self.runtime.spawn(inner.drive(entry));
        }
    }

    /// Run passes for one stack until nothing more is requested.
    async fn drive(self: Arc<Self>, entry: Arc<StackEntry>) {
        let mut monitor = SaturationMonitor::new();
        loop {
            while entry.pass_requested.swap(false, Ordering::SeqCst) {
                if entry.rearmed.swap(false, Ordering::SeqCst) {
                    monitor.reset();
                }
                let outcome = self.run_pass(&entry, &mut monitor).await;
                if outcome.should_continue() {
                    entry.pass_requested.store(true, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            }

            entry.driver_running.store(false, Ordering::SeqCst);

            // A request may have landed between the last swap and the store.
            if !entry.pass_requested.load(Ordering::SeqCst)
                || entry
                    .driver_running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
    }

    async fn run_pass(&self, entry: &StackEntry, monitor: &mut SaturationMonitor) -> PassOutcome {
        let Some(stack) = self.stacks.stack(&entry.id).filter(|stack| !stack.is_empty()) else {
            debug!(stack = %entry.id, "No stack data, skipping prefetch pass");
            return self.finish(entry, PassOutcome::NoStackData);
        };

        let gate = {
            let mut state = entry.state.lock();
            if state.is_complete() {
                state.disable();
                Err(PassOutcome::Complete)
            } else if !state.is_enabled() {
                Err(PassOutcome::Disabled)
            } else {
                Ok(state.ceiling_override())
            }
        };
        let ceiling_override = match gate {
            Ok(ceiling) => ceiling,
            Err(outcome) => return self.finish(entry, outcome),
        };

        let ceiling = ceiling_override
            .unwrap_or_else(|| self.config.ceiling_or_init(stack.len()))
            .max(1);
        let window = batch_window(stack.current_index, ceiling, stack.len());
        entry.passes.fetch_add(1, Ordering::Relaxed);

        debug!(
            stack = %entry.id,
            start = window.start,
            end = window.end,
            ceiling,
            "Prefetch pass started"
        );
        self.emit(PrefetchEvent::PassStarted {
            stack: entry.id.clone(),
            window: window.clone(),
        });

        let loader = self.loader.as_ref();
        let item_ids = &stack.item_ids;
        let stack_id = &entry.id;
        let mut loads: FuturesUnordered<_> = window
            .clone()
            .map(move |index| {
                let item_id = item_ids[index].as_str();
                debug!(stack = %stack_id, index, item_id, "Fetching item");
                let load = loader.load(item_id);
                async move { (index, item_id, load.await) }
            })
            .collect();

        let attempted = window.len();
        let mut failed = 0usize;

        while let Some((index, item_id, result)) = loads.next().await {
            match result {
                Ok(()) => self.record_success(entry, monitor, index, item_id),
                Err(err) => {
                    failed += 1;
                    self.record_failure(entry, index, item_id, &err);
                }
            }
        }

        if attempted > 0 && failed == attempted {
            error!(
                stack = %entry.id,
                attempted,
                "Prefetch batch failed for stack"
            );
            self.emit(PrefetchEvent::BatchFailure {
                stack: entry.id.clone(),
                attempted,
            });
            return self.finish(entry, PassOutcome::BatchFailed);
        }

        let keep_going = {
            let state = entry.state.lock();
            !state.is_complete() && state.is_enabled()
        };
        let outcome = if keep_going {
            PassOutcome::Continue
        } else {
            PassOutcome::Stopped
        };
        self.finish(entry, outcome)
    }

    fn record_success(
        &self,
        entry: &StackEntry,
        monitor: &mut SaturationMonitor,
        index: usize,
        item_id: &str,
    ) {
        let completed = entry.state.lock().mark_loaded(index);

        let cache_size_bytes = self.cache.size_bytes();
        let sample = monitor.observe(cache_size_bytes);
        // Every flat sample switches off, even after a mid-pass re-arm.
        if sample.is_unchanged() {
            entry.state.lock().disable();
        }

        debug!(
            stack = %entry.id,
            index,
            item_id,
            cache_size_bytes,
            "Done fetching item"
        );
        self.emit(PrefetchEvent::ItemLoaded {
            stack: entry.id.clone(),
            index,
            cache_size_bytes,
        });

        if sample == Sample::Saturated {
            info!(
                stack = %entry.id,
                cache_size_bytes,
                "Cache size isn't changing, stopping prefetching"
            );
            self.emit(PrefetchEvent::Saturated {
                stack: entry.id.clone(),
                cache_size_bytes,
            });
        }

        if completed {
            info!(stack = %entry.id, "All stack items loaded, prefetch complete");
            self.emit(PrefetchEvent::Completed {
                stack: entry.id.clone(),
            });
        }
    }

    fn record_failure(&self, entry: &StackEntry, index: usize, item_id: &str, err: &LoadError) {
        warn!(
            stack = %entry.id,
            index,
            item_id,
            error = %err,
            "Item not retrieved"
        );
        self.emit(PrefetchEvent::LoadFailure {
            stack: entry.id.clone(),
            index,
            item_id: item_id.to_string(),
            reason: err.to_string(),
        });
    }

    fn finish(&self, entry: &StackEntry, outcome: PassOutcome) -> PassOutcome {
        debug!(stack = %entry.id, outcome = %outcome, "Prefetch pass finished");
        *entry.last_outcome.lock() = Some(outcome);
        self.emit(PrefetchEvent::PassFinished {
            stack: entry.id.clone(),
            outcome,
        });
        outcome
    }

    fn emit(&self, event: PrefetchEvent) {
        // No subscribers is normal.
        let _ = self.events.send(event);
    }
}
