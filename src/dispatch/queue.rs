//! Work queues: FIFO admission onto the shared worker pool.
//!
//! A queue owns its submitted tasks until they start. Serial queues hand
//! one task at a time to the pool, so task N+1 never starts before task N
//! has fully completed; concurrent queues hand over up to their width cap.
//! Width and priority are read at dispatch time, so raising either
//! mid-flight applies to queued-but-not-started tasks.

use crate::dispatch::pool::{Job, Priority, WorkerPool};
use crate::error::{Error, Result};
use crate::sync::group::TaskGroup;
use crate::util::{lock, panic_message, wait};
use crate::{dlog, dlog_error, dlog_warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

/// Execution mode of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Effective concurrency of 1, start order equals submission order.
    Serial,
    /// FIFO admission, parallelism bounded only by the width cap.
    Concurrent,
}

impl std::fmt::Display for QueueMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueMode::Serial => write!(f, "serial"),
            QueueMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// What happens to queued-but-not-started tasks when a queue is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisposePolicy {
    /// Already-queued tasks still run; only new submissions are rejected.
    #[default]
    Drain,
    /// Queued tasks are dropped. Their group memberships are released so
    /// groups still resolve.
    Abandon,
}

thread_local! {
    /// Queues whose tasks are on the current thread's stack. Used to
    /// reject submit_sync from a queue's own worker.
    static ACTIVE_QUEUES: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

struct QueueMarker;

impl QueueMarker {
    fn push(key: usize) -> Self {
        ACTIVE_QUEUES.with(|stack| stack.borrow_mut().push(key));
        Self
    }
}

impl Drop for QueueMarker {
    fn drop(&mut self) {
        ACTIVE_QUEUES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

struct QueuedTask {
    run: Box<dyn FnOnce() + Send + 'static>,
    group: Option<TaskGroup>,
}

struct QueueState {
    ready: VecDeque<QueuedTask>,
    running: usize,
    width: Option<usize>,
    priority: Priority,
    paused: bool,
    disposed: bool,
}

struct QueueInner {
    label: String,
    mode: QueueMode,
    dispose_policy: DisposePolicy,
    pool: Arc<WorkerPool>,
    state: Mutex<QueueState>,
}

/// Handle to a work queue. Clones address the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    pub(crate) fn new(
        label: &str,
        mode: QueueMode,
        width: Option<usize>,
        priority: Priority,
        dispose_policy: DisposePolicy,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                label: label.to_string(),
                mode,
                dispose_policy,
                pool,
                state: Mutex::new(QueueState {
                    ready: VecDeque::new(),
                    running: 0,
                    width,
                    priority,
                    paused: false,
                    disposed: false,
                }),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn mode(&self) -> QueueMode {
        self.inner.mode
    }

    pub fn priority(&self) -> Priority {
        lock(&self.inner.state).priority
    }

    /// Configured width cap. Serial queues always run at width 1
    /// regardless of this value.
    pub fn width(&self) -> Option<usize> {
        lock(&self.inner.state).width
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner.state).paused
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.state).disposed
    }

    /// Tasks admitted but not yet handed to the pool.
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).ready.len()
    }

    /// Tasks currently handed to the pool and not yet completed.
    pub fn running(&self) -> usize {
        lock(&self.inner.state).running
    }

    /// Enqueue a task at the tail.
    pub fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(None, Box::new(f))
    }

    /// Enqueue a task wrapped in an enter/leave pair on `group`. The leave
    /// runs on every exit path of the task, including panics.
    pub fn submit_with_group<F>(&self, group: &TaskGroup, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Some(group.clone()), Box::new(f))
    }

    /// Run a task on this queue and block until it completes, returning
    /// its value.
    ///
    /// Must not be called from this queue's own worker: on a serial queue
    /// that is a guaranteed self-deadlock, so it is rejected up front for
    /// both modes.
    pub fn submit_sync<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let key = self.key();
        let on_own_worker = ACTIVE_QUEUES.with(|stack| stack.borrow().contains(&key));
        if on_own_worker {
            return Err(Error::SyncOnOwnQueue {
                label: self.inner.label.clone(),
            });
        }

        let cell = Arc::new(SyncCell::new());
        let mut guard = AbandonGuard {
            cell: Arc::clone(&cell),
            fired: false,
        };
        self.submit(move || {
            let out = match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => Ok(value),
                Err(payload) => Err(panic_message(payload)),
            };
            guard.complete(out);
        })?;

        match cell.wait_result() {
            SyncResult::Done(Ok(value)) => Ok(value),
            SyncResult::Done(Err(error)) => Err(Error::TaskFailed(error)),
            SyncResult::Abandoned => Err(Error::QueueDisposed {
                label: self.inner.label.clone(),
            }),
        }
    }

    /// Stop starting new tasks; in-flight tasks finish.
    pub fn pause(&self) {
        lock(&self.inner.state).paused = true;
    }

    /// Resume starting tasks.
    pub fn resume(&self) {
        lock(&self.inner.state).paused = false;
        self.pump();
    }

    /// Change the width cap. Applies to queued-but-not-started tasks; a
    /// serial queue's effective width stays 1.
    pub fn set_width(&self, width: Option<usize>) {
        lock(&self.inner.state).width = width;
        self.pump();
    }

    /// Change the priority class. Applies to queued-but-not-started tasks.
    pub fn set_priority(&self, priority: Priority) {
        lock(&self.inner.state).priority = priority;
    }

    /// Dispose the queue per its policy. Further submissions are
    /// rejected; in-flight tasks always finish. Idempotent.
    pub fn dispose(&self) {
        let abandoned = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            match self.inner.dispose_policy {
                DisposePolicy::Drain => Vec::new(),
                DisposePolicy::Abandon => state.ready.drain(..).collect(),
            }
        };
        if !abandoned.is_empty() {
            dlog!(
                "queue '{}' disposed, abandoning {} queued task(s)",
                self.inner.label,
                abandoned.len()
            );
        }
        for task in abandoned {
            // Dropping the closure fires any sync-abandon guards; the
            // group membership still needs an explicit release.
            if let Some(group) = task.group {
                if let Err(e) = group.leave() {
                    dlog_error!("abandoned task leave failed: {}", e);
                }
            }
        }
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn effective_width(&self, state: &QueueState) -> usize {
        match self.inner.mode {
            QueueMode::Serial => 1,
            QueueMode::Concurrent => state.width.unwrap_or(usize::MAX),
        }
    }

    fn enqueue(&self, group: Option<TaskGroup>, run: Box<dyn FnOnce() + Send + 'static>) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::QueueDisposed {
                label: self.inner.label.clone(),
            });
        }
        if let Some(g) = &group {
            g.enter();
        }
        {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                // Raced with dispose; undo the membership.
                drop(state);
                if let Some(g) = &group {
                    let _ = g.leave();
                }
                return Err(Error::QueueDisposed {
                    label: self.inner.label.clone(),
                });
            }
            state.ready.push_back(QueuedTask { run, group });
        }
        self.pump();
        Ok(())
    }

    /// Hand ready tasks to the pool, as far as pause state and the
    /// effective width allow.
    fn pump(&self) {
        let (to_dispatch, priority) = {
            let mut state = lock(&self.inner.state);
            let width = self.effective_width(&state);
            let mut batch = Vec::new();
            while !state.paused && state.running < width {
                match state.ready.pop_front() {
                    Some(task) => {
                        state.running += 1;
                        batch.push(task);
                    }
                    None => break,
                }
            }
            (batch, state.priority)
        };

        for task in to_dispatch {
            let group = task.group.clone();
            let queue = self.clone();
            let job = Job::new(move || queue.run_task(task));
            if self.inner.pool.submit(priority, job).is_err() {
                // The job (and its task) was dropped by the send failure.
                dlog_error!(
                    "queue '{}': pool is shut down, dropping task",
                    self.inner.label
                );
                lock(&self.inner.state).running -= 1;
                if let Some(g) = group {
                    let _ = g.leave();
                }
            }
        }
    }

    fn run_task(&self, task: QueuedTask) {
        let marker = QueueMarker::push(self.key());
        let result = catch_unwind(AssertUnwindSafe(task.run));
        drop(marker);

        if let Err(payload) = result {
            let message = panic_message(payload);
            dlog_warn!(
                "queue '{}': task panicked: {}",
                self.inner.label,
                message
            );
            if let Some(group) = &task.group {
                group.record_failure(&message);
            }
        }
        if let Some(group) = task.group {
            if let Err(e) = group.leave() {
                dlog_error!("queue '{}': {}", self.inner.label, e);
            }
        }
        self.task_finished();
    }

    fn task_finished(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.running = state.running.saturating_sub(1);
        }
        self.pump();
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("WorkQueue")
            .field("label", &self.inner.label)
            .field("mode", &self.inner.mode)
            .field("pending", &state.ready.len())
            .field("running", &state.running)
            .finish()
    }
}

enum SyncSlot<T> {
    Pending,
    Done(std::result::Result<T, String>),
    Abandoned,
}

enum SyncResult<T> {
    Done(std::result::Result<T, String>),
    Abandoned,
}

struct SyncCell<T> {
    slot: Mutex<SyncSlot<T>>,
    cv: Condvar,
}

impl<T> SyncCell<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(SyncSlot::Pending),
            cv: Condvar::new(),
        }
    }

    fn wait_result(&self) -> SyncResult<T> {
        let mut slot = lock(&self.slot);
        loop {
            match std::mem::replace(&mut *slot, SyncSlot::Pending) {
                SyncSlot::Pending => {
                    slot = wait(&self.cv, slot);
                }
                SyncSlot::Done(result) => return SyncResult::Done(result),
                SyncSlot::Abandoned => return SyncResult::Abandoned,
            }
        }
    }
}

/// Signals the sync waiter even when the task is dropped unrun (queue
/// disposed with the Abandon policy).
struct AbandonGuard<T> {
    cell: Arc<SyncCell<T>>,
    fired: bool,
}

impl<T> AbandonGuard<T> {
    fn complete(&mut self, result: std::result::Result<T, String>) {
        *lock(&self.cell.slot) = SyncSlot::Done(result);
        self.cell.cv.notify_all();
        self.fired = true;
    }
}

impl<T> Drop for AbandonGuard<T> {
    fn drop(&mut self) {
        if !self.fired {
            *lock(&self.cell.slot) = SyncSlot::Abandoned;
            self.cell.cv.notify_all();
        }
    }
}
