//! Bounded slot pool for in-flight transfers.
//!
//! Each admitted unit holds exactly one `Slot` for its whole lifetime; the slot
//! goes back to the pool when dropped, on success, failure or panic alike.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::control::CancelToken;

/// How often a blocked `acquire` re-checks the cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct ThrottleState {
    outstanding: usize,
    peak: usize,
}

/// Counting semaphore with capacity = max concurrency. `outstanding` never
/// exceeds `capacity`.
#[derive(Debug)]
pub struct Throttle {
    capacity: usize,
    state: Mutex<ThrottleState>,
    freed: Condvar,
}

impl Throttle {
    /// Create a throttle with `capacity` slots (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(ThrottleState::default()),
            freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.lock().outstanding)
    }

    /// Highest `outstanding` value observed since creation.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    /// Block until a slot is free or `cancel` is set. Returns `None` without
    /// granting a slot once cancellation is observed.
    pub fn acquire(self: &Arc<Self>, cancel: &CancelToken) -> Option<Slot> {
        let mut state = self.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if state.outstanding < self.capacity {
                return Some(self.grant(&mut state));
            }
            state = match self.freed.wait_timeout(state, CANCEL_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Slot> {
        let mut state = self.lock();
        if state.outstanding < self.capacity {
            Some(self.grant(&mut state))
        } else {
            None
        }
    }

    fn grant(self: &Arc<Self>, state: &mut ThrottleState) -> Slot {
        state.outstanding += 1;
        state.peak = state.peak.max(state.outstanding);
        Slot {
            throttle: Arc::clone(self),
        }
    }

    /// Return one slot and wake one waiter. Saturating: a release with nothing
    /// outstanding is ignored, so the pool never grows past `capacity`.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.outstanding == 0 {
            tracing::debug!("throttle release with no outstanding slot ignored");
            return;
        }
        state.outstanding -= 1;
        drop(state);
        self.freed.notify_one();
    }
}

/// One held throttle slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct Slot {
    throttle: Arc<Throttle>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.throttle.release();
    }
}
