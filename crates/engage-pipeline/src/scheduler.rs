//! One-shot, single-slot timer used to debounce batch flushes.
//!
//! At most one timer is armed at a time. Arming while armed is a no-op, and
//! cancellation is idempotent. Callbacks run on a runtime task, never inline
//! on the thread that armed the timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engage_core::PipelineError;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Identifies one arming of a [`Scheduler`]. A callback receives the id it
/// was armed with so owners can discard firings they have since superseded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

struct Armed {
    id: TimerId,
    cancel: CancellationToken,
}

pub struct Scheduler {
    runtime: Handle,
    armed: Arc<Mutex<Option<Armed>>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            armed: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self, PipelineError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| PipelineError::NoRuntime(e.to_string()))
    }

    /// Arm the timer to run `f` once after `delay`.
    ///
    /// Returns `None` without replacing anything if a timer is already armed.
    /// The slot is disarmed before `f` runs, so `f` may arm it again.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> Option<TimerId>
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        let mut armed = self.armed.lock();
        if armed.is_some() {
            trace!("timer already armed");
            return None;
        }

        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        *armed = Some(Armed {
            id,
            cancel: cancel.clone(),
        });
        drop(armed);

        let slot = Arc::clone(&self.armed);
        let _ = self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    trace!(?id, "timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    {
                        let mut armed = slot.lock();
                        if armed.as_ref().map(|a| a.id) != Some(id) {
                            return;
                        }
                        *armed = None;
                    }
                    trace!(?id, "timer fired");
                    f(id);
                }
            }
        });
        Some(id)
    }

    /// Disarm the pending timer, if any. Returns whether one was armed.
    pub fn cancel(&self) -> bool {
        match self.armed.lock().take() {
            Some(armed) => {
                armed.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.cancel();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("armed", &self.is_armed())
            .finish()
    }
}
