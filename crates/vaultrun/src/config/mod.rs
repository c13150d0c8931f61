use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::ExecutionLimits;

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../vaultrun.example.toml");

/// Prefix for environment variable overrides, e.g. `VAULTRUN_DISPATCH__MAX_CONCURRENCY`
pub const ENV_PREFIX: &str = "VAULTRUN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for vaultrun
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding encrypted dataset files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for decrypted working copies. Defaults to `data_dir`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Directory that relative result image paths are resolved against
    #[serde(default = "default_plot_dir")]
    pub plot_dir: PathBuf,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval: f64,
}

impl SchedulerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of runs executing at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Transient failures allowed before a run is marked as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionConfig {
    /// Default limits applied to every script.
    /// Overridden per computation.
    #[serde(default)]
    pub limits: ExecutionLimits,

    /// Working directory for scripts (inherits the process's if unset)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Environment variables set for every script
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// A config rooted at `data_dir`, with built-in defaults everywhere else
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            work_dir: None,
            plot_dir: default_plot_dir(),
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }

    /// Directory where decrypted working copies are written
    pub fn working_copy_dir(&self) -> &Path {
        self.work_dir.as_deref().unwrap_or(&self.data_dir)
    }

    /// Merge per-computation limits with the configured defaults
    pub fn effective_limits(&self, overrides: Option<&ExecutionLimits>) -> ExecutionLimits {
        match overrides {
            Some(limits) => self.execution.limits.with_overrides(limits),
            None => self.execution.limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./dataset_files")
}

fn default_plot_dir() -> PathBuf {
    PathBuf::from("./dataset_plot_images")
}

fn default_tick_interval() -> f64 {
    60.0
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}
