//! Countdown of admitted units that have not settled yet.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Counts units between admission and their terminal state. Shutdown and
/// cleanup wait on it reaching zero instead of sleeping a fixed delay.
#[derive(Debug, Default)]
pub struct SettleLatch {
    pending: Mutex<usize>,
    settled: Condvar,
}

impl SettleLatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register one admitted unit. The unit settles when the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> SettleGuard {
        *self.lock() += 1;
        SettleGuard {
            latch: Arc::clone(self),
        }
    }

    pub fn pending(&self) -> usize {
        *self.lock()
    }

    /// Wait until no unit is pending or `timeout` elapses. Returns true when settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = match self.settled.wait_timeout_while(guard, timeout, |p| *p > 0) {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard == 0
    }

    fn leave(&self) {
        let mut pending = self.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.settled.notify_all();
        }
    }
}

/// Held by a unit from admission until it settles.
#[derive(Debug)]
pub struct SettleGuard {
    latch: Arc<SettleLatch>,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.latch.leave();
    }
}
