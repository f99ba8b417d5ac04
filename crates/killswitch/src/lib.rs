//! One-shot broadcast stop signal shared by every load-generating task.
//!
//! A [`Killswitch`] carries two pieces of state:
//!
//! - the stop flag, which moves from armed to triggered exactly once and wakes
//!   every task waiting on [`Killswitch::triggered`];
//! - a counter of active workers, incremented through
//!   [`Killswitch::register_active`] and decremented when the returned
//!   [`ActiveGuard`] is dropped. [`Killswitch::drained`] resolves once the
//!   counter is back to zero.
//!
//! Clones share the same state.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    stop: watch::Sender<bool>,
    active: watch::Sender<usize>,
}

/// Broadcast cancellation signal plus an active-worker counter.
#[derive(Clone, Debug)]
pub struct Killswitch {
    inner: Arc<Inner>,
}

impl Default for Killswitch {
    fn default() -> Self {
        Self::new()
    }
}

impl Killswitch {
    /// Create an armed killswitch with no active workers.
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner { stop, active }),
        }
    }

    /// Fire the switch.
    ///
    /// Returns `true` only for the call that moved the switch from armed to
    /// triggered; every later or concurrent call returns `false`.
    pub fn trigger(&self) -> bool {
        self.inner.stop.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    /// Non-blocking probe of the stop flag.
    pub fn is_triggered(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Resolves once the switch has fired, immediately if it already has.
    pub async fn triggered(&self) {
        let mut rx = self.inner.stop.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Count one more active worker until the returned guard is dropped.
    pub fn register_active(&self) -> ActiveGuard {
        self.inner.active.send_modify(|n| *n += 1);
        ActiveGuard {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Number of workers currently registered.
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolves when no worker is registered.
    ///
    /// Only meaningful after [`trigger`](Self::trigger): before that, new
    /// workers may still register after this returns.
    pub async fn drained(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Registration handle returned by [`Killswitch::register_active`].
#[derive(Debug)]
#[must_use = "dropping the guard deregisters the worker immediately"]
pub struct ActiveGuard {
    inner: Option<Arc<Inner>>,
}

impl ActiveGuard {
    /// Deregister explicitly. Equivalent to dropping the guard.
    pub fn deregister(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.active.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}
