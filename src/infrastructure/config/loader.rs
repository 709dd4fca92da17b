use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project directory holding `config.yaml`, `local.yaml` and the database.
pub const PROJECT_DIR: &str = ".colony";

/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "COLONY_";

/// Upper bound on the retry backoff so scheduled times stay representable.
pub const MAX_BACKOFF_CEILING_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error("Invalid lease_ttl_secs: {0}. Must be at least 1")]
    InvalidLeaseTtl(u64),

    #[error("Invalid default_max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid max_backoff_secs: {0}. Must be between 1 and {MAX_BACKOFF_CEILING_SECS}")]
    InvalidBackoff(u64),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(u32),

    #[error(
        "scheduler.invocation_timeout_secs ({timeout_secs}) must be shorter than queue.lease_ttl_secs ({lease_ttl_secs})"
    )]
    InvocationOutlivesLease {
        timeout_secs: u64,
        lease_ttl_secs: u64,
    },

    #[error("Invalid invoker base_url '{0}': {1}")]
    InvalidBaseUrl(String, String),

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
    /// 2. .colony/config.yaml (project config, created by init)
    /// 3. .colony/local.yaml (project local overrides, optional)
    /// 4. Environment variables (COLONY_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(PROJECT_DIR)
    }

    /// Same layering as [`load`](Self::load) with the project files read from `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

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
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        if !(config.rate_limit.requests_per_second > 0.0
            && config.rate_limit.requests_per_second.is_finite())
        {
            return Err(ConfigError::InvalidRateLimit(
                config.rate_limit.requests_per_second,
            ));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        if config.queue.lease_ttl_secs == 0 {
            return Err(ConfigError::InvalidLeaseTtl(config.queue.lease_ttl_secs));
        }
        if config.queue.default_max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(
                config.queue.default_max_attempts,
            ));
        }
        if config.queue.max_backoff_secs == 0
            || config.queue.max_backoff_secs > MAX_BACKOFF_CEILING_SECS
        {
            return Err(ConfigError::InvalidBackoff(config.queue.max_backoff_secs));
        }

        if config.scheduler.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(config.scheduler.batch_size));
        }
        if config.scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "scheduler.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if config.scheduler.invocation_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "scheduler.invocation_timeout_secs must be at least 1".to_string(),
            ));
        }
        // A lease that expires mid-invocation lets another scheduler run the same job.
        if config.scheduler.invocation_timeout_secs >= config.queue.lease_ttl_secs {
            return Err(ConfigError::InvocationOutlivesLease {
                timeout_secs: config.scheduler.invocation_timeout_secs,
                lease_ttl_secs: config.queue.lease_ttl_secs,
            });
        }

        if config.cascade.synthesis_worker.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "cascade.synthesis_worker cannot be empty".to_string(),
            ));
        }

        if let Err(e) = reqwest::Url::parse(&config.invoker.base_url) {
            return Err(ConfigError::InvalidBaseUrl(
                config.invoker.base_url.clone(),
                e.to_string(),
            ));
        }

        Ok(())
    }
}
