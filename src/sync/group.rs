//! Task group: completion tracking across queues.
//!
//! A group counts enter/leave pairs for an arbitrary set of in-flight
//! tasks, possibly spanning several queues. When the pending count crosses
//! back to zero, every registered notification is submitted to its target
//! queue exactly once for that crossing; later enters start a new cycle.

use crate::dispatch::queue::WorkQueue;
use crate::dlog_debug;
use crate::error::{Error, Result};
use crate::util::{lock, wait, wait_deadline};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Result of a bounded group wait. A timeout cancels nothing; the tracked
/// tasks keep running and a later wait re-checks the live count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

type NotifyFn = Box<dyn FnOnce() + Send + 'static>;

struct Notification {
    queue: WorkQueue,
    callback: NotifyFn,
}

struct GroupState {
    pending: usize,
    /// Bumped at every zero-crossing; distinguishes batches.
    generation: u64,
    notifications: Vec<Notification>,
    /// Failures reported by tasks of the current batch.
    failures: Vec<String>,
}

struct GroupInner {
    label: String,
    state: Mutex<GroupState>,
    cv: Condvar,
}

/// Tracks completion of a dynamic set of tasks. Clones share state.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

impl TaskGroup {
    pub fn new(label: &str) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                label: label.to_string(),
                state: Mutex::new(GroupState {
                    pending: 0,
                    generation: 0,
                    notifications: Vec::new(),
                    failures: Vec::new(),
                }),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Number of unmatched enters.
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).pending
    }

    /// Zero-crossings seen so far.
    pub fn generation(&self) -> u64 {
        lock(&self.inner.state).generation
    }

    /// Register a task with the group.
    pub fn enter(&self) {
        lock(&self.inner.state).pending += 1;
    }

    /// Match a prior [`enter`](Self::enter). On the 1 -> 0 crossing, fires
    /// the registered notifications and wakes waiters.
    ///
    /// Calling with nothing pending is a usage error, not a silent
    /// wraparound.
    pub fn leave(&self) -> Result<()> {
        let fired = {
            let mut state = lock(&self.inner.state);
            if state.pending == 0 {
                return Err(Error::UnbalancedLeave {
                    label: self.inner.label.clone(),
                });
            }
            state.pending -= 1;
            if state.pending == 0 {
                state.generation += 1;
                self.inner.cv.notify_all();
                std::mem::take(&mut state.notifications)
            } else {
                Vec::new()
            }
        };

        if !fired.is_empty() {
            dlog_debug!(
                "group '{}' zero-crossing, scheduling {} notification(s)",
                self.inner.label,
                fired.len()
            );
        }
        // Submitted outside the group lock; a later enter starts a new
        // cycle and cannot retract these.
        for notification in fired {
            if let Err(e) = notification.queue.submit(notification.callback) {
                crate::dlog_warn!(
                    "group '{}' notification dropped: {}",
                    self.inner.label,
                    e
                );
            }
        }
        Ok(())
    }

    /// Register a callback to run on `queue` at the next zero-crossing.
    /// If nothing is pending, the callback is submitted immediately.
    pub fn notify<F>(&self, queue: &WorkQueue, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.inner.state);
        if state.pending == 0 {
            drop(state);
            queue.submit(callback)?;
        } else {
            state.notifications.push(Notification {
                queue: queue.clone(),
                callback: Box::new(callback),
            });
        }
        Ok(())
    }

    /// Block until the pending count reaches zero, or until `timeout` if
    /// one is given. The pending count is re-read every call, so waits are
    /// repeatable after a timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut state = lock(&self.inner.state);
        match timeout {
            None => {
                while state.pending > 0 {
                    state = wait(&self.inner.cv, state);
                }
                WaitOutcome::Completed
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.pending > 0 {
                    let (reacquired, expired) = wait_deadline(&self.inner.cv, state, deadline);
                    state = reacquired;
                    if state.pending == 0 {
                        return WaitOutcome::Completed;
                    }
                    if expired {
                        return WaitOutcome::TimedOut;
                    }
                }
                WaitOutcome::Completed
            }
        }
    }

    /// Record a task failure against the current batch.
    pub fn record_failure(&self, error: &str) {
        lock(&self.inner.state).failures.push(error.to_string());
    }

    /// Drain the failures recorded since the last call.
    pub fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.inner.state).failures)
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("TaskGroup")
            .field("label", &self.inner.label)
            .field("pending", &state.pending)
            .field("generation", &state.generation)
            .finish()
    }
}
