use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be between 1 and 64")]
    InvalidConcurrency(usize),

    #[error("Invalid poll_interval_ms: must be greater than 0")]
    InvalidPollInterval,

    #[error("Invalid {name}: {value}. Must be between 0 and 1")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Invalid persistent_error_window: {0}. Must be at least 2")]
    InvalidPersistentWindow(usize),

    #[error("Invalid max_rounds: must be at least 1")]
    InvalidMaxRounds,

    #[error("Invalid target_accuracy: {0}. Must be in (0, 1]")]
    InvalidTargetAccuracy(f64),

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .promptloop/config.yaml (project config)
    /// 3. .promptloop/local.yaml (project local overrides, optional)
    /// 4. Environment variables (PROMPTLOOP_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".promptloop/config.yaml"))
            .merge(Yaml::file(".promptloop/local.yaml"))
            .merge(Env::prefixed("PROMPTLOOP_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring environment overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("PROMPTLOOP_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        // Pipeline
        let pipeline = &config.pipeline;
        if pipeline.max_concurrency == 0 || pipeline.max_concurrency > 64 {
            return Err(ConfigError::InvalidConcurrency(pipeline.max_concurrency));
        }
        if pipeline.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if !(0.0..=1.0).contains(&pipeline.necessity_threshold) {
            return Err(ConfigError::InvalidThreshold {
                name: "necessity_threshold",
                value: pipeline.necessity_threshold,
            });
        }
        if pipeline.persistent_error_window < 2 {
            return Err(ConfigError::InvalidPersistentWindow(
                pipeline.persistent_error_window,
            ));
        }
        if pipeline.max_error_samples == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_error_samples must be at least 1".to_string(),
            ));
        }
        if pipeline.max_prompt_growth <= 1.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "max_prompt_growth must be greater than 1, got {}",
                pipeline.max_prompt_growth
            )));
        }

        // Auto-iterate defaults
        if config.auto_iterate.max_rounds == 0 {
            return Err(ConfigError::InvalidMaxRounds);
        }
        let target = config.auto_iterate.target_accuracy;
        if target <= 0.0 || target > 1.0 {
            return Err(ConfigError::InvalidTargetAccuracy(target));
        }
        if config.auto_iterate.max_strategies == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_strategies must be at least 1".to_string(),
            ));
        }

        // Database
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        // Rate limit
        if config.rate_limit.requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidRateLimit(
                config.rate_limit.requests_per_second,
            ));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        // Retry
        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        // LLM endpoint
        if config.llm.base_url.trim().is_empty() || config.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm.base_url and llm.model must be set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StrategyMode;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.pipeline.max_concurrency, 5);
        assert!((config.pipeline.necessity_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.pipeline.persistent_error_window, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.max_concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(0))
        ));

        let mut config = Config::default();
        config.pipeline.necessity_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let mut config = Config::default();
        config.auto_iterate.target_accuracy = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTargetAccuracy(_))
        ));

        let mut config = Config::default();
        config.retry.initial_backoff_ms = 50_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(50_000, 30_000))
        ));
    }

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "pipeline:\n  max_concurrency: 8\n  necessity_threshold: 0.6\nauto_iterate:\n  strategy_mode: serial\n  max_rounds: 2"
        )
        .unwrap();

        let config = temp_env::with_vars_unset(
            ["PROMPTLOOP_PIPELINE__MAX_CONCURRENCY"],
            || ConfigLoader::load_from_file(file.path()),
        )
        .unwrap();
        assert_eq!(config.pipeline.max_concurrency, 8);
        assert!((config.pipeline.necessity_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.auto_iterate.strategy_mode, StrategyMode::Serial);
        assert_eq!(config.auto_iterate.max_rounds, 2);
        assert_eq!(config.pipeline.poll_interval_ms, 500);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pipeline:\n  max_concurrency: 8").unwrap();

        let config = temp_env::with_var("PROMPTLOOP_PIPELINE__MAX_CONCURRENCY", Some("3"), || {
            ConfigLoader::load_from_file(file.path())
        })
        .unwrap();
        assert_eq!(config.pipeline.max_concurrency, 3);
    }

    #[test]
    fn test_invalid_file_value_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: loud").unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.database.path, Config::default().database.path);
        assert_eq!(parsed.auto_iterate.strategy_mode, StrategyMode::Parallel);
    }
}
