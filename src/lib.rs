//! dispatchq: a task-dispatch runtime.
//!
//! Serial and concurrent work queues feed a shared worker-thread pool.
//! Task groups track batches across queues and notify at the zero
//! crossing; counting semaphores gate access to bounded resources with
//! FIFO fairness; cancellable work units run through a small lifecycle
//! state machine; the scheduler dispatches units in dependency order and
//! rejects cycles before anything runs.

pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod observer;
pub mod orchestration;
pub mod sync;

pub(crate) mod util;

pub use crate::config::RuntimeConfig;
pub use crate::core::graph::DepGraph;
pub use crate::core::unit::{
    Completer, Outcome, UnitContext, UnitId, UnitPoll, UnitState, WorkUnit,
};
pub use crate::dispatch::pool::{Priority, WorkerPool};
pub use crate::dispatch::queue::{DisposePolicy, QueueMode, WorkQueue};
pub use crate::dispatch::runtime::Runtime;
pub use crate::error::{Error, Result};
pub use crate::observer::LifecycleObserver;
pub use crate::orchestration::scheduler::{Scheduler, SchedulerEvent};
pub use crate::sync::group::{TaskGroup, WaitOutcome};
pub use crate::sync::semaphore::{AcquireOutcome, Semaphore};
