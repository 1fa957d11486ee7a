use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::orchestration::DistributionStrategy;
use crate::workflow::RetryPolicy;
use crate::{Error, Result};

/// Default capacity of the orchestration event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timeout applied to steps that do not declare their own.
    pub default_step_timeout_ms: Option<u64>,
    /// Retry policy applied to steps that do not declare their own.
    pub default_retry: Option<RetryPolicy>,
    /// Strategy used when a caller does not pick one.
    pub default_strategy: DistributionStrategy,
    /// Spawn a fresh agent when none of the step's type can be acquired.
    pub auto_spawn: bool,
    pub event_buffer: usize,
    /// Log at debug level. See [`Config::init_logging`].
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: None,
            default_retry: None,
            default_strategy: DistributionStrategy::default(),
            auto_spawn: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
            debug: false,
        }
    }
}

impl Config {
    pub fn weave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".weave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::weave_dir()?.join("weave.toml"))
    }

    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_ms.map(Duration::from_millis)
    }

    /// Install the tracing subscriber, at debug level when `debug` is set.
    pub fn init_logging(&self) {
        crate::log::init_with_debug(self.debug);
    }

    /// Load `~/.weave/weave.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        debug!(
            strategy = %config.default_strategy,
            auto_spawn = config.auto_spawn,
            timeout_ms = ?config.default_step_timeout_ms,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}
