//! Lifecycle transition hook.
//!
//! Telemetry of unit lifecycle transitions is an external collaborator:
//! the runtime invokes a caller-provided observer on every state change
//! instead of shipping its own metrics layer.

use crate::core::unit::{UnitId, UnitState};
use std::sync::Arc;

/// Observer invoked on every unit state transition.
///
/// Implementations must be cheap and must not block: the hook runs on the
/// worker thread that performed the transition, while no runtime lock is
/// held.
pub trait LifecycleObserver: Send + Sync {
    fn on_transition(&self, id: UnitId, label: &str, from: UnitState, to: UnitState);
}

/// Observer that forwards transitions to the log file. Useful as a default
/// wiring in examples and tests.
pub struct LogObserver;

impl LifecycleObserver for LogObserver {
    fn on_transition(&self, id: UnitId, label: &str, from: UnitState, to: UnitState) {
        crate::dlog_debug!(
            "unit {} '{}' transition {} -> {}",
            id.short(),
            label,
            from,
            to
        );
    }
}

/// Observer that records transitions in memory, for assertions in tests.
#[derive(Default)]
pub struct RecordingObserver {
    transitions: std::sync::Mutex<Vec<(UnitId, UnitState, UnitState)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transitions(&self) -> Vec<(UnitId, UnitState, UnitState)> {
        crate::util::lock(&self.transitions).clone()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_transition(&self, id: UnitId, _label: &str, from: UnitState, to: UnitState) {
        crate::util::lock(&self.transitions).push((id, from, to));
    }
}
