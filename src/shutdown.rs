//! One-shot broadcast signal — a latch any number of waiters may observe,
//! raised at most once. Used for `started`, `finished`, and the pool-wide
//! shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct OneShotSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl OneShotSignal {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Raise the signal. Idempotent: only the first call has any effect.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait until fired. Returns immediately if already fired. Race-free:
    /// the `notified()` future is created before the flag is re-checked, so
    /// a `fire()` landing between the check and the await cannot be missed.
    pub async fn wait(&self) {
        if self.fired.load(Ordering::SeqCst) {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if self.fired.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// A guard ensuring a block of logic is claimed by at most one caller.
/// Unlike `std::sync::Once`, `try_claim` tells the caller whether *they*
/// won, which a Start/Kill race between two callers depends on.
#[derive(Default)]
pub struct OnceGuard {
    claimed: AtomicBool,
}

impl OnceGuard {
    pub fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once, for the first caller to invoke this.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
