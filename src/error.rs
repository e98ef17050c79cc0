use crate::core::unit::UnitId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("leave() without matching enter() on group '{label}'")]
    UnbalancedLeave { label: String },

    #[error("dependency cycle among units: {}", units.join(" -> "))]
    DependencyCycle { units: Vec<String> },

    #[error("unit {id} is already admitted")]
    AlreadySubmitted { id: UnitId },

    #[error("unit not found: {id}")]
    UnitNotFound { id: UnitId },

    #[error("submit_sync called from a worker of queue '{label}'")]
    SyncOnOwnQueue { label: String },

    #[error("queue '{label}' is disposed")]
    QueueDisposed { label: String },

    #[error("worker pool is shut down")]
    PoolShutDown,

    #[error("synchronous task failed: {0}")]
    TaskFailed(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
