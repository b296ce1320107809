//! Cooperative cancellation shared by the ingest thread, the scheduler loop and the
//! device manager.
//!
//! A `CancelToken` is a one-way latch. Waiters block on a condvar so a cancelled
//! scheduler wakes immediately instead of sleeping out its interval. Hooks registered
//! with `on_cancel` run exactly once, on the thread that calls `cancel()`; the device
//! source uses this to forward a stop request into its event channel.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    cancelled: bool,
    hooks: Vec<Hook>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the token. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        let hooks = {
            let mut state = self.lock();
            if state.cancelled {
                return false;
            }
            state.cancelled = true;
            std::mem::take(&mut state.hooks)
        };
        self.inner.cond.notify_all();
        for hook in hooks {
            hook();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Register a hook to run on cancellation. Runs immediately if already cancelled.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.cancelled {
            drop(state);
            hook();
            return;
        }
        state.hooks.push(Box::new(hook));
    }

    /// Wait up to `timeout` for cancellation. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Hooks never run under the lock, so a poisoned state is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
