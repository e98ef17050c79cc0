//! Unit-of-work data model.
//!
//! A [`WorkUnit`] is a cancellable, dependency-aware task with an explicit
//! lifecycle: `ready -> executing -> finished`, plus an orthogonal
//! cancellation flag. Units are handed to a queue by the scheduler and
//! record an [`Outcome`] when they finish.

use crate::dlog_warn;
use crate::observer::LifecycleObserver;
use crate::util::{lock, panic_message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Unique identifier for a unit of work.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub Uuid);

impl UnitId {
    /// Create a new unique unit identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UnitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a unit.
///
/// `Ready` at creation, `Executing` once a worker picks it up, `Finished`
/// when the body has run (or been skipped due to cancellation). The
/// cancellation flag is orthogonal and reflected in the [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Created, not yet picked up by a worker.
    Ready,
    /// A worker is running (or has suspended) the body.
    Executing,
    /// Terminal. The outcome says how it ended.
    Finished,
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Ready => write!(f, "ready"),
            UnitState::Executing => write!(f, "executing"),
            UnitState::Finished => write!(f, "finished"),
        }
    }
}

/// How a finished unit ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    /// The body ran to completion and returned Ok.
    Success,
    /// The cancellation flag was observed; no success is claimed.
    Cancelled,
    /// The body returned an error or panicked.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// What a unit body reports back to the runtime.
pub enum UnitPoll {
    /// The work is done; the unit finishes on the calling stack.
    Complete(std::result::Result<(), String>),
    /// The work suspended itself and will finish later through the
    /// [`Completer`] taken from the context.
    Deferred,
}

/// Execution context handed to a unit body.
///
/// Exposes the cooperative cancellation flag and, for suspending work,
/// a completer that finishes the unit off the calling stack.
pub struct UnitContext {
    inner: Arc<UnitInner>,
}

impl UnitContext {
    /// Whether cancellation has been requested. Bodies poll this at safe
    /// checkpoints and return early when it reads true.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Obtain a completer for deferred completion. Only meaningful when
    /// the body returns [`UnitPoll::Deferred`].
    pub fn completer(&self) -> Completer {
        Completer {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Finishes a deferred unit from wherever the suspended work resumes.
pub struct Completer {
    inner: Arc<UnitInner>,
}

impl Completer {
    /// Transition the unit to `Finished` with the given result.
    pub fn complete(self, result: std::result::Result<(), String>) {
        WorkUnit { inner: self.inner }.finish_with(result);
    }
}

type UnitBody = Box<dyn FnOnce(&UnitContext) -> UnitPoll + Send + 'static>;
type FinishHook = Box<dyn FnOnce(UnitId, Outcome) + Send + 'static>;

struct UnitCore {
    state: UnitState,
    outcome: Option<Outcome>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct UnitInner {
    id: UnitId,
    label: String,
    cancelled: AtomicBool,
    admitted: AtomicBool,
    observer: Option<Arc<dyn LifecycleObserver>>,
    core: Mutex<UnitCore>,
    body: Mutex<Option<UnitBody>>,
    on_finish: Mutex<Option<FinishHook>>,
}

/// Serializable point-in-time view of a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub label: String,
    pub state: UnitState,
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A cancellable, dependency-aware unit of work.
///
/// Cloning yields another handle to the same unit. A unit can be admitted
/// to at most one scheduler/queue at a time; it is reclaimed only after
/// reaching `Finished`.
#[derive(Clone)]
pub struct WorkUnit {
    inner: Arc<UnitInner>,
}

impl WorkUnit {
    /// Create a unit whose body reports completion via [`UnitPoll`].
    pub fn new<F>(label: &str, body: F) -> Self
    where
        F: FnOnce(&UnitContext) -> UnitPoll + Send + 'static,
    {
        Self::build(label, Box::new(body), None)
    }

    /// Create a unit from a plain synchronous body.
    pub fn from_fn<F>(label: &str, body: F) -> Self
    where
        F: FnOnce(&UnitContext) -> std::result::Result<(), String> + Send + 'static,
    {
        Self::new(label, move |ctx| UnitPoll::Complete(body(ctx)))
    }

    /// Create a unit with a lifecycle observer attached.
    pub fn with_observer<F>(label: &str, observer: Arc<dyn LifecycleObserver>, body: F) -> Self
    where
        F: FnOnce(&UnitContext) -> UnitPoll + Send + 'static,
    {
        Self::build(label, Box::new(body), Some(observer))
    }

    fn build(label: &str, body: UnitBody, observer: Option<Arc<dyn LifecycleObserver>>) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                id: UnitId::new(),
                label: label.to_string(),
                cancelled: AtomicBool::new(false),
                admitted: AtomicBool::new(false),
                observer,
                core: Mutex::new(UnitCore {
                    state: UnitState::Ready,
                    outcome: None,
                    created_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                }),
                body: Mutex::new(Some(body)),
                on_finish: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UnitState {
        lock(&self.inner.core).state
    }

    /// Outcome, present once the unit is `Finished`.
    pub fn outcome(&self) -> Option<Outcome> {
        lock(&self.inner.core).outcome.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == UnitState::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation. Never interrupts a running body;
    /// a no-op once the unit is finished.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Serializable view of the unit's current state.
    pub fn snapshot(&self) -> UnitSnapshot {
        let core = lock(&self.inner.core);
        UnitSnapshot {
            id: self.inner.id,
            label: self.inner.label.clone(),
            state: core.state,
            outcome: core.outcome.clone(),
            created_at: core.created_at,
            started_at: core.started_at,
            finished_at: core.finished_at,
        }
    }

    /// Claim this unit for admission. Returns false if already claimed.
    pub(crate) fn try_admit(&self) -> bool {
        !self.inner.admitted.swap(true, Ordering::AcqRel)
    }

    /// Release an admission claim. Only valid for a claim taken by the
    /// caller that was never dispatched.
    pub(crate) fn revert_admission(&self) {
        self.inner.admitted.store(false, Ordering::Release);
    }

    /// Install a hook invoked exactly once when the unit finishes.
    pub(crate) fn set_on_finish(&self, hook: FinishHook) {
        *lock(&self.inner.on_finish) = Some(hook);
    }

    /// Execute the unit's state machine on the current thread.
    ///
    /// A cancelled-but-unstarted unit transitions straight to `Finished`
    /// with outcome `Cancelled`, without running the body.
    pub fn run(&self) {
        {
            let mut core = lock(&self.inner.core);
            if core.state != UnitState::Ready {
                drop(core);
                dlog_warn!(
                    "unit {} run() in state {}, ignoring",
                    self.inner.id.short(),
                    self.state()
                );
                return;
            }
            if self.inner.cancelled.load(Ordering::Acquire) {
                drop(core);
                self.finish(Outcome::Cancelled);
                return;
            }
            core.state = UnitState::Executing;
            core.started_at = Some(Utc::now());
        }
        self.emit(UnitState::Ready, UnitState::Executing);

        let body = lock(&self.inner.body).take();
        let ctx = UnitContext {
            inner: Arc::clone(&self.inner),
        };
        let poll = match body {
            Some(body) => catch_unwind(AssertUnwindSafe(|| body(&ctx))),
            None => Ok(UnitPoll::Complete(Ok(()))),
        };
        match poll {
            Ok(UnitPoll::Deferred) => {
                // The body holds a Completer; it finishes the unit later.
            }
            Ok(UnitPoll::Complete(result)) => self.finish_with(result),
            Err(payload) => self.finish(Outcome::Failed {
                error: panic_message(payload),
            }),
        }
    }

    fn finish_with(&self, result: std::result::Result<(), String>) {
        // A cancel flag set any time before finish wins over Ok: the unit
        // must not claim success once cancellation was requested.
        let outcome = if self.inner.cancelled.load(Ordering::Acquire) {
            Outcome::Cancelled
        } else {
            match result {
                Ok(()) => Outcome::Success,
                Err(error) => Outcome::Failed { error },
            }
        };
        self.finish(outcome);
    }

    fn finish(&self, outcome: Outcome) {
        let from = {
            let mut core = lock(&self.inner.core);
            if core.state == UnitState::Finished {
                return;
            }
            let from = core.state;
            core.state = UnitState::Finished;
            core.outcome = Some(outcome.clone());
            core.finished_at = Some(Utc::now());
            from
        };
        self.emit(from, UnitState::Finished);
        if let Some(hook) = lock(&self.inner.on_finish).take() {
            hook(self.inner.id, outcome);
        }
    }

    fn emit(&self, from: UnitState, to: UnitState) {
        if let Some(observer) = &self.inner.observer {
            observer.on_transition(self.inner.id, &self.inner.label, from, to);
        }
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}
