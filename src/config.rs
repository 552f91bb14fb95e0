//! Kernel configuration, persisted as TOML.
//!
//! Every field has a serde default, so an empty file (or no file at all)
//! yields [`KernelConfig::default`]. The config is read once when a kernel is
//! built; limits are fixed from then on.

use std::path::Path;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feedback::FeedbackConfig;
use crate::limits::LimitsPolicy;

/// Errors from config file operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read kernel config: {path}")]
    #[diagnostic(
        code(akh::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse kernel config: {path}: {message}")]
    #[diagnostic(
        code(akh::config::parse),
        help("Check the TOML syntax and the section names: [limits], [feedback], [watch].")
    )]
    Parse { path: String, message: String },

    #[error("failed to write kernel config: {path}")]
    #[diagnostic(
        code(akh::config::write),
        help("Ensure you have write permissions to the kernel root.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub feedback: FeedbackSection,
    #[serde(default)]
    pub watch: WatchConfig,
    /// Mirror session facts to `session.redb` (default: true).
    #[serde(default = "default_persist_session")]
    pub persist_session: bool,
}

fn default_persist_session() -> bool {
    true
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            feedback: FeedbackSection::default(),
            watch: WatchConfig::default(),
            persist_session: default_persist_session(),
        }
    }
}

/// `[limits]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_facts")]
    pub max_facts: usize,
    #[serde(default = "default_max_derived_facts")]
    pub max_derived_facts: usize,
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
}

fn default_max_facts() -> usize {
    100_000
}
fn default_max_derived_facts() -> usize {
    50_000
}
fn default_max_session_secs() -> u64 {
    8 * 60 * 60
}
fn default_max_memory_mb() -> usize {
    256
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_facts: default_max_facts(),
            max_derived_facts: default_max_derived_facts(),
            max_session_secs: default_max_session_secs(),
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

/// `[feedback]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSection {
    #[serde(default = "default_per_attempt_timeout_ms")]
    pub per_attempt_timeout_ms: u64,
    #[serde(default = "default_min_attempt_time_ms")]
    pub min_attempt_time_ms: u64,
    /// Attempts used by the CLI when none are given.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_per_attempt_timeout_ms() -> u64 {
    30_000
}
fn default_min_attempt_time_ms() -> u64 {
    500
}
fn default_max_attempts() -> usize {
    3
}

impl Default for FeedbackSection {
    fn default() -> Self {
        Self {
            per_attempt_timeout_ms: default_per_attempt_timeout_ms(),
            min_attempt_time_ms: default_min_attempt_time_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// `[watch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiet period after the last file event before a rebuild.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    250
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl KernelConfig {
    /// The limits policy this config describes.
    pub fn limits_policy(&self) -> LimitsPolicy {
        LimitsPolicy {
            max_facts: self.limits.max_facts,
            max_derived_facts: self.limits.max_derived_facts,
            max_session_duration: Duration::from_secs(self.limits.max_session_secs),
            max_memory_bytes: self.limits.max_memory_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Timing for the repair loop.
    pub fn feedback_config(&self) -> FeedbackConfig {
        FeedbackConfig {
            per_attempt_timeout: Duration::from_millis(self.feedback.per_attempt_timeout_ms),
            min_attempt_time: Duration::from_millis(self.feedback.min_attempt_time_ms),
        }
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load from a TOML file, or use defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}
