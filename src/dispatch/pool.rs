//! Shared worker-thread pool.
//!
//! All queues of a runtime map their tasks onto one pool of OS threads.
//! Handover is a set of crossbeam channels, one lane per priority class;
//! workers drain higher lanes first. Dropping the senders on shutdown lets
//! workers finish everything already handed over, then exit.

use crate::error::{Error, Result};
use crate::util::{lock, panic_message, wait};
use crate::{dlog, dlog_warn};
use crossbeam_channel::{unbounded, Receiver, Select, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Priority class of a queue. Tasks are handed to the pool through the
/// lane matching their queue's priority at dispatch time, so a mid-flight
/// priority change applies to queued-but-not-started tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

impl Priority {
    fn lane(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Default => 1,
            Priority::Low => 2,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Default => write!(f, "default"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// A unit of handover between a queue and the pool.
pub(crate) struct Job {
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    pub(crate) fn new<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self { run: Box::new(f) }
    }
}

/// Outstanding-job accounting shared with the workers. A running job may
/// hand over its queue's next task before it finishes, so the count never
/// dips to zero mid-chain and shutdown cannot cut a serial queue short.
struct JobCounter {
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl JobCounter {
    fn increment(&self) {
        *lock(&self.outstanding) += 1;
    }

    fn decrement(&self) {
        let mut outstanding = lock(&self.outstanding);
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut outstanding = lock(&self.outstanding);
        while *outstanding > 0 {
            outstanding = wait(&self.idle, outstanding);
        }
    }
}

/// Fixed-size pool of worker threads servicing every queue of a runtime.
pub struct WorkerPool {
    lanes: Mutex<Option<[Sender<Job>; 3]>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counter: Arc<JobCounter>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads (at least one).
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (high_tx, high_rx) = unbounded();
        let (default_tx, default_rx) = unbounded();
        let (low_tx, low_rx) = unbounded();

        let counter = Arc::new(JobCounter {
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
        });
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let receivers = [high_rx.clone(), default_rx.clone(), low_rx.clone()];
            let counter = Arc::clone(&counter);
            let handle = std::thread::Builder::new()
                .name(format!("dispatchq-worker-{}", i))
                .spawn(move || worker_loop(receivers, counter))?;
            handles.push(handle);
        }
        dlog!("worker pool started with {} thread(s)", workers);

        Ok(Self {
            lanes: Mutex::new(Some([high_tx, default_tx, low_tx])),
            workers: Mutex::new(handles),
            counter,
            size: workers,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.lanes).is_none()
    }

    /// Hand a job to the lane for `priority`.
    pub(crate) fn submit(&self, priority: Priority, job: Job) -> Result<()> {
        let lanes = lock(&self.lanes);
        let senders = lanes.as_ref().ok_or(Error::PoolShutDown)?;
        self.counter.increment();
        senders[priority.lane()].send(job).map_err(|_| {
            self.counter.decrement();
            Error::PoolShutDown
        })
    }

    /// Wait for every handed-over job (and anything those jobs hand over
    /// in turn) to complete, then stop the workers. Idempotent.
    pub fn shutdown(&self) {
        self.counter.wait_idle();
        let senders = lock(&self.lanes).take();
        if senders.is_none() {
            return;
        }
        drop(senders);
        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            let _ = handle.join();
        }
        dlog!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receivers: [Receiver<Job>; 3], counter: Arc<JobCounter>) {
    let mut open = [true; 3];
    loop {
        // Prefer higher lanes when work is available.
        let mut ran = false;
        for lane in 0..3 {
            if !open[lane] {
                continue;
            }
            match receivers[lane].try_recv() {
                Ok(job) => {
                    run_job(job, &counter);
                    ran = true;
                    break;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => open[lane] = false,
            }
        }
        if ran {
            continue;
        }
        if !open.iter().any(|&o| o) {
            break;
        }

        // Nothing immediately available: park on all open lanes.
        let mut select = Select::new();
        let mut lanes = Vec::new();
        for (lane, receiver) in receivers.iter().enumerate() {
            if open[lane] {
                lanes.push(lane);
                select.recv(receiver);
            }
        }
        let op = select.select();
        let lane = lanes[op.index()];
        match op.recv(&receivers[lane]) {
            Ok(job) => run_job(job, &counter),
            Err(_) => open[lane] = false,
        }
    }
}

fn run_job(job: Job, counter: &JobCounter) {
    // Queues contain their own panics; this is the backstop that keeps a
    // worker thread alive no matter what slipped through.
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job.run)) {
        dlog_warn!("worker caught stray panic: {}", panic_message(payload));
    }
    counter.decrement();
}
