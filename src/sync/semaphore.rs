//! Counting semaphore with FIFO wake order.
//!
//! The counter and the wait list are mutated as a single atomic step under
//! one lock; waiters park on their own condvar slot so releases wake
//! exactly the head of the FIFO list. A timed-out `acquire` does not
//! refund its decrement: the slot stays consumed until a matching
//! `release`, mirroring the wait/signal discipline this models.

use crate::util::{lock, wait, wait_deadline};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Result of a bounded acquire. A timeout is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    TimedOut,
}

struct WaitSlot {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl WaitSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            granted: Mutex::new(false),
            cv: Condvar::new(),
        })
    }
}

struct SemState {
    /// May go negative; `-count` is then the number of consumed-but-
    /// unreleased slots attributed to waiters (current or timed out).
    count: i64,
    waiters: VecDeque<Arc<WaitSlot>>,
}

/// A counting semaphore. Clones share the same counter.
///
/// `new(1)` gives mutual exclusion; `new(n)` bounds a resource to `n`
/// concurrent holders; `new(0)` is a pure signal/wait rendezvous.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Mutex<SemState>>,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SemState {
                count: i64::from(initial),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Decrement the counter; block (FIFO) while the result is negative.
    pub fn acquire(&self) {
        let slot = {
            let mut state = lock(&self.inner);
            state.count -= 1;
            if state.count >= 0 {
                return;
            }
            let slot = WaitSlot::new();
            state.waiters.push_back(Arc::clone(&slot));
            slot
        };

        let mut granted = lock(&slot.granted);
        while !*granted {
            granted = wait(&slot.cv, granted);
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// On timeout the waiter leaves the FIFO list but the decrement
    /// stands; the caller is expected to signal consistently with the
    /// outcome of the guarded operation.
    pub fn acquire_timeout(&self, timeout: Duration) -> AcquireOutcome {
        let slot = {
            let mut state = lock(&self.inner);
            state.count -= 1;
            if state.count >= 0 {
                return AcquireOutcome::Acquired;
            }
            let slot = WaitSlot::new();
            state.waiters.push_back(Arc::clone(&slot));
            slot
        };

        let deadline = Instant::now() + timeout;
        let mut granted = lock(&slot.granted);
        loop {
            if *granted {
                return AcquireOutcome::Acquired;
            }
            let (reacquired, expired) = wait_deadline(&slot.cv, granted, deadline);
            granted = reacquired;
            if *granted {
                return AcquireOutcome::Acquired;
            }
            if expired {
                break;
            }
        }
        drop(granted);

        let mut state = lock(&self.inner);
        if let Some(pos) = state
            .waiters
            .iter()
            .position(|w| Arc::ptr_eq(w, &slot))
        {
            // Still queued: withdraw. The counter keeps the consumed slot.
            state.waiters.remove(pos);
            AcquireOutcome::TimedOut
        } else {
            // A release already dequeued us; the grant is ours.
            AcquireOutcome::Acquired
        }
    }

    /// Increment the counter; if it was negative, wake the head waiter.
    pub fn release(&self) {
        let slot = {
            let mut state = lock(&self.inner);
            let was_negative = state.count < 0;
            state.count += 1;
            if was_negative {
                state.waiters.pop_front()
            } else {
                None
            }
        };
        if let Some(slot) = slot {
            let mut granted = lock(&slot.granted);
            *granted = true;
            slot.cv.notify_one();
        }
    }

    /// Current counter value. Negative while slots are consumed beyond
    /// the initial value.
    pub fn value(&self) -> i64 {
        lock(&self.inner).count
    }

    /// Number of callers currently parked in the wait list.
    pub fn waiting(&self) -> usize {
        lock(&self.inner).waiters.len()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}
