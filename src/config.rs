//! Opflow Configuration Module
//!
//! Storage location, activity log capacity, execution timeouts and
//! per-type module option defaults.
//! Config is stored in `~/.config/opflow/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`OPFLOW_DATA_DIR`, `OPFLOW_ACTIVITY_CAPACITY`,
//!    `OPFLOW_MODULE_TIMEOUT_SECS`, `OPFLOW_COMMAND_READ_WINDOW_MS`)
//! 2. Config file (`~/.config/opflow/config.toml`)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ast::{ModuleKind, StepOptions};
use crate::error::{OpflowError, Result};
use crate::util::{
    ACTIVITY_CAPACITY, COMMAND_READ_WINDOW, COMMAND_TIMEOUT, JOB_START_TIMEOUT, MODULE_TIMEOUT,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OpflowConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub activity: ActivityConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Module options applied before target-derived and step options
    #[serde(default)]
    pub step_defaults: StepDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// JSON-directory persistence when set, in-memory otherwise
    pub data_dir: Option<PathBuf>,

    /// NDJSON file the activity log is mirrored to
    pub activity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            capacity: ACTIVITY_CAPACITY,
        }
    }
}

fn default_capacity() -> usize {
    ACTIVITY_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub module_timeout_secs: u64,
    pub job_start_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Settle window while reading command output
    pub command_read_window_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            module_timeout_secs: MODULE_TIMEOUT.as_secs(),
            job_start_timeout_secs: JOB_START_TIMEOUT.as_secs(),
            command_timeout_secs: COMMAND_TIMEOUT.as_secs(),
            command_read_window_ms: COMMAND_READ_WINDOW.as_millis() as u64,
        }
    }
}

/// Per-type module option defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepDefaults {
    #[serde(default, skip_serializing_if = "StepOptions::is_empty")]
    pub exploit: StepOptions,
    #[serde(default, skip_serializing_if = "StepOptions::is_empty")]
    pub auxiliary: StepOptions,
    #[serde(default, skip_serializing_if = "StepOptions::is_empty")]
    pub post: StepOptions,
}

impl StepDefaults {
    pub fn for_kind(&self, kind: ModuleKind) -> &StepOptions {
        match kind {
            ModuleKind::Exploit => &self.exploit,
            ModuleKind::Auxiliary => &self.auxiliary,
            ModuleKind::Post => &self.post,
        }
    }
}

/// Timeouts the step executor works with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub module_timeout: Duration,
    pub job_start_timeout: Duration,
    pub command_timeout: Duration,
    pub command_read_window: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            module_timeout: MODULE_TIMEOUT,
            job_start_timeout: JOB_START_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
            command_read_window: COMMAND_READ_WINDOW,
        }
    }
}

impl OpflowConfig {
    /// Get the config directory path
    ///
    /// Returns `~/.config/opflow/` on Unix, `%APPDATA%/opflow/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("opflow")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default path, then apply env overrides and validate
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())?.with_env()?.validated()
    }

    /// Load from a given file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| OpflowError::ConfigError {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Save to the default path (creates the directory if needed)
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| OpflowError::ConfigError {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| OpflowError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| OpflowError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(dir) = env_var("OPFLOW_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(capacity) = env_parse::<usize>("OPFLOW_ACTIVITY_CAPACITY")? {
            self.activity.capacity = capacity;
        }
        if let Some(secs) = env_parse::<u64>("OPFLOW_MODULE_TIMEOUT_SECS")? {
            self.execution.module_timeout_secs = secs;
        }
        if let Some(ms) = env_parse::<u64>("OPFLOW_COMMAND_READ_WINDOW_MS")? {
            self.execution.command_read_window_ms = ms;
        }
        Ok(self)
    }

    /// Reject zero capacities and timeouts
    pub fn validated(self) -> Result<Self> {
        let zero = |name: &str| OpflowError::ConfigError {
            reason: format!("{} must be greater than zero", name),
        };
        if self.activity.capacity == 0 {
            return Err(zero("activity.capacity"));
        }
        let exec = &self.execution;
        if exec.module_timeout_secs == 0 {
            return Err(zero("execution.module_timeout_secs"));
        }
        if exec.job_start_timeout_secs == 0 {
            return Err(zero("execution.job_start_timeout_secs"));
        }
        if exec.command_timeout_secs == 0 {
            return Err(zero("execution.command_timeout_secs"));
        }
        if exec.command_read_window_ms == 0 {
            return Err(zero("execution.command_read_window_ms"));
        }
        Ok(self)
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            module_timeout: Duration::from_secs(self.execution.module_timeout_secs),
            job_start_timeout: Duration::from_secs(self.execution.job_start_timeout_secs),
            command_timeout: Duration::from_secs(self.execution.command_timeout_secs),
            command_read_window: Duration::from_millis(self.execution.command_read_window_ms),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    env_var(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| OpflowError::ConfigError {
                reason: format!("{} must be a non-negative integer, got '{}'", name, raw),
            })
        })
        .transpose()
}
