//! Blocking synchronization primitives: counting semaphore and task group.

pub mod group;
pub mod semaphore;
