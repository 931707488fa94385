//! Configuration file loading
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
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
        if self.compile.command.is_empty() {
            return Err(ConfigError::Invalid("compile command is empty".to_owned()));
        }
        if !self.compile.command.iter().any(|a| a.contains("{source}")) {
            return Err(ConfigError::Invalid(
                "compile command never references {source}".to_owned(),
            ));
        }
        if self.run.command.is_empty() {
            return Err(ConfigError::Invalid("run command is empty".to_owned()));
        }
        if !self.run.command.iter().any(|a| a.contains("{main_class}")) {
            return Err(ConfigError::Invalid(
                "run command never references {main_class}".to_owned(),
            ));
        }
        if self.box_count == 0 {
            return Err(ConfigError::Invalid("box_count must be at least 1".to_owned()));
        }
        if self.ipc.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ipc.max_attempts must be at least 1".to_owned(),
            ));
        }

        let durations = [
            ("compile.timeout", self.compile.timeout),
            ("judge.default_time_limit", self.judge.default_time_limit),
            ("judge.max_time_limit", self.judge.max_time_limit),
            ("daemon.poll_interval", self.daemon.poll_interval),
            ("ipc.initial_backoff", self.ipc.initial_backoff),
            ("ipc.max_backoff", self.ipc.max_backoff),
            ("ipc.request_timeout", self.ipc.request_timeout),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }
        if self.compile.timeout == 0.0 || self.judge.default_time_limit == 0.0 {
            return Err(ConfigError::Invalid(
                "compile.timeout and judge.default_time_limit must be positive".to_owned(),
            ));
        }
        if self.judge.default_time_limit > self.judge.max_time_limit {
            return Err(ConfigError::Invalid(format!(
                "judge.default_time_limit ({}) exceeds judge.max_time_limit ({})",
                self.judge.default_time_limit, self.judge.max_time_limit
            )));
        }

        Ok(())
    }
}
