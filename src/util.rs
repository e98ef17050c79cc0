//! Small shared helpers for the sync primitives.

use std::any::Any;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// The primitives never hold their own locks across user code, so a
/// poisoned lock only means a task panicked between our own statements;
/// the protected state is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Block on a condvar, recovering from poisoning like [`lock`].
pub(crate) fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(|e| e.into_inner())
}

/// Block on a condvar until the deadline. Returns the reacquired guard and
/// whether the deadline has passed.
pub(crate) fn wait_deadline<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: Instant,
) -> (MutexGuard<'a, T>, bool) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining == Duration::ZERO {
        return (guard, true);
    }
    let (guard, _timeout) = cv
        .wait_timeout(guard, remaining)
        .unwrap_or_else(|e| e.into_inner());
    let expired = Instant::now() >= deadline;
    (guard, expired)
}

/// Render a panic payload as a human-readable message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
