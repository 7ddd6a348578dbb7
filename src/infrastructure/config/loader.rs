use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project directory holding config and database
pub const PROJECT_DIR: &str = ".shepherd";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid retry.max_attempts: {0}. Must be at least 1")]
    InvalidRetryBudget(u32),

    #[error("Invalid poll interval: {0}s. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid poll configuration: initial_poll_secs ({0}) must not exceed max_poll_secs ({1})")]
    InvalidPollCap(u64, u64),

    #[error("Invalid backoff_multiplier: {0}. Must be at least 1.0")]
    InvalidBackoffMultiplier(f64),

    #[error("Pipeline timeout cannot be 0")]
    ZeroPipelineTimeout,

    #[error("Invalid agent budget: {0} cannot be 0")]
    ZeroAgentBudget(&'static str),

    #[error("Invalid ci_client.max_attempts: {0}. Must be at least 1")]
    InvalidCiAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Branch prefix cannot be empty")]
    EmptyBranchPrefix,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .shepherd/config.yaml (project config, created by init)
    /// 3. .shepherd/local.yaml (project local overrides, optional)
    /// 4. Environment variables (SHEPHERD_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(Path::new(PROJECT_DIR))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SHEPHERD_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(project_dir: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(project_dir.join("config.yaml")))
            .merge(Yaml::file(project_dir.join("local.yaml")))
            .merge(Env::prefixed("SHEPHERD_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryBudget(config.retry.max_attempts));
        }

        let pipeline = &config.pipeline;
        if pipeline.initial_poll_secs == 0 {
            return Err(ConfigError::InvalidPollInterval(pipeline.initial_poll_secs));
        }
        if pipeline.initial_poll_secs > pipeline.max_poll_secs {
            return Err(ConfigError::InvalidPollCap(
                pipeline.initial_poll_secs,
                pipeline.max_poll_secs,
            ));
        }
        if pipeline.backoff_multiplier < 1.0 || !pipeline.backoff_multiplier.is_finite() {
            return Err(ConfigError::InvalidBackoffMultiplier(
                pipeline.backoff_multiplier,
            ));
        }
        if pipeline.timeout_secs == 0 {
            return Err(ConfigError::ZeroPipelineTimeout);
        }

        if config.agent.max_turns == 0 {
            return Err(ConfigError::ZeroAgentBudget("agent.max_turns"));
        }
        if config.agent.wall_clock_secs == 0 {
            return Err(ConfigError::ZeroAgentBudget("agent.wall_clock_secs"));
        }
        for (stage, over) in &config.agent.per_stage {
            if over.max_turns == Some(0) || over.wall_clock_secs == Some(0) {
                tracing::debug!(%stage, "rejecting zero per-stage agent budget");
                return Err(ConfigError::ZeroAgentBudget("agent.per_stage"));
            }
        }

        let ci = &config.ci_client;
        if ci.max_attempts == 0 {
            return Err(ConfigError::InvalidCiAttempts(ci.max_attempts));
        }
        if ci.initial_backoff_ms > ci.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                ci.initial_backoff_ms,
                ci.max_backoff_ms,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.vcs.branch_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyBranchPrefix);
        }

        Ok(())
    }
}
