use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{dlog_debug, Error, Result};

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Runtime configuration, loaded from `~/.dispatchq/dispatchq.toml`.
///
/// Every field has a default so a missing file or a partial file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads in the shared pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Default width cap applied to concurrent queues created without an
    /// explicit cap. `None` means unbounded (up to the pool size).
    #[serde(default)]
    pub default_queue_width: Option<usize>,
    /// Enable debug-level logging.
    #[serde(default)]
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            default_queue_width: None,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    pub fn dispatchq_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".dispatchq"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::dispatchq_dir()?.join("dispatchq.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        dlog_debug!("RuntimeConfig::load path={}", path.display());
        if !path.exists() {
            dlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        dlog_debug!(
            "Config loaded: worker_threads={}, default_queue_width={:?}, debug={}",
            config.worker_threads,
            config.default_queue_width,
            config.debug
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::dispatchq_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        dlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
