//! Configuration file loading for vaultrun
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX};

impl Config {
    /// Load configuration from a file, with `VAULTRUN_*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let tick = self.scheduler.tick_interval;
        if !tick.is_finite() || tick <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "scheduler.tick_interval must be positive, got {tick}"
            )));
        }
        if self.dispatch.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(timeout) = self.execution.limits.timeout
            && (!timeout.is_finite() || timeout <= 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "execution.limits.timeout must be positive, got {timeout}"
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir is empty".to_string()));
        }

        Ok(())
    }
}
