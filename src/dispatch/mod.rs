pub mod pool;
pub mod queue;
pub mod runtime;
