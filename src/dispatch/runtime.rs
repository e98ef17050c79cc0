//! Runtime: owns the worker pool and mints queues onto it.

use crate::config::RuntimeConfig;
use crate::dispatch::pool::{Priority, WorkerPool};
use crate::dispatch::queue::{DisposePolicy, QueueMode, WorkQueue};
use crate::dlog;
use crate::error::Result;
use crate::util::lock;
use std::sync::{Arc, Mutex};

/// A worker pool plus the configuration its queues inherit. Queues from
/// one runtime share its pool; queues from different runtimes are fully
/// independent.
pub struct Runtime {
    pool: Arc<WorkerPool>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Runtime with `workers` pool threads and default configuration.
    pub fn new(workers: usize) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        config.worker_threads = workers;
        Self::with_config(config)
    }

    /// Runtime sized and defaulted per `config`.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        dlog!("runtime created with {} worker(s)", pool.size());
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Create a queue with the runtime's defaults for width, priority,
    /// and dispose policy.
    pub fn queue(&self, label: &str, mode: QueueMode) -> WorkQueue {
        self.queue_with(
            label,
            mode,
            self.config.default_queue_width,
            Priority::Default,
            DisposePolicy::Drain,
        )
    }

    /// Create a queue with explicit settings.
    pub fn queue_with(
        &self,
        label: &str,
        mode: QueueMode,
        width: Option<usize>,
        priority: Priority,
        dispose_policy: DisposePolicy,
    ) -> WorkQueue {
        dlog!("creating {} queue '{}'", mode, label);
        WorkQueue::new(
            label,
            mode,
            width,
            priority,
            dispose_policy,
            Arc::clone(&self.pool),
        )
    }

    /// Wait for in-flight and already-queued work to finish, then stop
    /// the workers. Idempotent; queues minted from this runtime reject
    /// pool handover afterwards.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

static GLOBAL: Mutex<Option<Arc<Runtime>>> = Mutex::new(None);

/// Install the process-wide runtime. Replaces (and shuts down) any
/// previous one.
pub fn init(workers: usize) -> Result<Arc<Runtime>> {
    let runtime = Arc::new(Runtime::new(workers)?);
    let previous = lock(&GLOBAL).replace(Arc::clone(&runtime));
    if let Some(old) = previous {
        old.shutdown();
    }
    Ok(runtime)
}

/// The process-wide runtime, if one was installed with [`init`].
pub fn global() -> Option<Arc<Runtime>> {
    lock(&GLOBAL).clone()
}

/// Shut down and remove the process-wide runtime.
pub fn shutdown_global() {
    if let Some(runtime) = lock(&GLOBAL).take() {
        runtime.shutdown();
    }
}
