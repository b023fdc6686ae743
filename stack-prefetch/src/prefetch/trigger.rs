//! Position-change trigger for a stack.
//!
//! While a stack is being prefetched, a single listener task watches the
//! stack's position-change channel and invokes a handler per event. The
//! binding owns the listener's cancellation token:
//!
//! - [`bind`](TriggerBinding::bind) is idempotent. A second call while a
//!   listener is live does nothing, so repeated `enable` calls never stack up
//!   handlers.
//! - [`unbind`](TriggerBinding::unbind) cancels the listener. In-flight
//!   handler invocations finish; no new ones start.
//!
//! The listener also ends by itself when the position channel closes (the
//! stack was removed by the host), after which the binding reads as unbound.

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::services::{PositionEvents, StackId};

/// Subscription of one handler to one stack's position changes.
#[derive(Debug, Default)]
pub struct TriggerBinding {
    listener: Mutex<Option<CancellationToken>>,
}

impl TriggerBinding {
    /// Create an unbound trigger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a listener is currently live.
    pub fn is_bound(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Subscribe `on_change` to the stack's position changes.
    ///
    /// Returns `true` if a new listener was started, `false` if one was
    /// already live or the host has no position channel for the stack.
    pub fn bind<F>(
        &self,
        stack: &StackId,
        events: &dyn PositionEvents,
        runtime: &Handle,
        on_change: F,
    ) -> bool
    where
        F: Fn(usize) + Send + 'static,
    {
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }

        let Some(mut position_rx) = events.subscribe(stack) else {
            debug!(stack = %stack, "No position channel for stack, trigger not bound");
            return false;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let stack = stack.clone();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancelled.cancelled() => break,

                    received = position_rx.recv() => match received {
                        Ok(index) => on_change(index),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(stack = %stack, skipped, "Position trigger lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            // Mark unbound when the channel closed on its own.
            cancelled.cancel();
            debug!(stack = %stack, "Position trigger listener stopped");
        });

        *listener = Some(token);
        true
    }

    /// Cancel the listener.
    ///
    /// Returns `true` if a live listener was cancelled.
    pub fn unbind(&self) -> bool {
        match self.listener.lock().take() {
            Some(token) => {
                let was_live = !token.is_cancelled();
                token.cancel();
                was_live
            }
            None => false,
        }
    }
}
