use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::issue::Stage;

/// Main configuration structure for Shepherd
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stage retry budgets
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pipeline polling and timeout policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// I/O-level retries against the CI backend
    #[serde(default)]
    pub ci_client: CiClientConfig,

    /// Agent invocation budgets and model selection
    #[serde(default)]
    pub agent: AgentConfig,

    /// Version-control settings
    #[serde(default)]
    pub vcs: VcsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".shepherd/shepherd.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log file rotation
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Retry budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum retries per (issue, stage)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-stage overrides of `max_attempts`
    #[serde(default)]
    pub per_stage: BTreeMap<Stage, u32>,
}

const fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            per_stage: BTreeMap::new(),
        }
    }
}

/// Pipeline polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// First poll interval in seconds
    #[serde(default = "default_initial_poll_secs")]
    pub initial_poll_secs: u64,

    /// Poll interval cap in seconds
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,

    /// Poll interval growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ceiling after which a run is classified as timed out
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,

    /// Lines of a failed job's trace kept as feedback
    #[serde(default = "default_trace_tail_lines")]
    pub trace_tail_lines: usize,
}

const fn default_initial_poll_secs() -> u64 {
    10
}

const fn default_max_poll_secs() -> u64 {
    60
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_pipeline_timeout_secs() -> u64 {
    1800
}

const fn default_trace_tail_lines() -> usize {
    40
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_poll_secs: default_initial_poll_secs(),
            max_poll_secs: default_max_poll_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout_secs: default_pipeline_timeout_secs(),
            trace_tail_lines: default_trace_tail_lines(),
        }
    }
}

impl PipelineConfig {
    pub const fn initial_poll(&self) -> Duration {
        Duration::from_secs(self.initial_poll_secs)
    }

    pub const fn max_poll(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// CI backend client retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CiClientConfig {
    /// Attempts per backend query before surfacing a transient infra error
    #[serde(default = "default_ci_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_ci_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_ci_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_ci_max_attempts() -> u32 {
    3
}

const fn default_ci_initial_backoff_ms() -> u64 {
    500
}

const fn default_ci_max_backoff_ms() -> u64 {
    4000
}

impl Default for CiClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_ci_max_attempts(),
            initial_backoff_ms: default_ci_initial_backoff_ms(),
            max_backoff_ms: default_ci_max_backoff_ms(),
        }
    }
}

/// Per-stage overrides for agent invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentOverride {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub wall_clock_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Agent invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Model to request from the runtime (runtime default when unset)
    #[serde(default)]
    pub model: Option<String>,

    /// Maximum conversation turns per invocation
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Wall-clock budget per invocation in seconds
    #[serde(default = "default_wall_clock_secs")]
    pub wall_clock_secs: u64,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Per-stage overrides
    #[serde(default)]
    pub per_stage: BTreeMap<Stage, AgentOverride>,
}

const fn default_max_turns() -> u32 {
    25
}

const fn default_wall_clock_secs() -> u64 {
    1800
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_turns: default_max_turns(),
            wall_clock_secs: default_wall_clock_secs(),
            temperature: None,
            per_stage: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Resolve the settings for one stage's invocation.
    pub fn profile_for(&self, stage: Stage) -> AgentProfile {
        let overrides = self.per_stage.get(&stage).cloned().unwrap_or_default();
        AgentProfile {
            model: overrides.model.or_else(|| self.model.clone()),
            max_turns: overrides.max_turns.unwrap_or(self.max_turns),
            wall_clock: Duration::from_secs(overrides.wall_clock_secs.unwrap_or(self.wall_clock_secs)),
            temperature: overrides.temperature.or(self.temperature),
        }
    }
}

/// Resolved agent settings passed explicitly into each invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub model: Option<String>,
    pub max_turns: u32,
    pub wall_clock: Duration,
    pub temperature: Option<f32>,
}

/// Version-control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VcsConfig {
    /// Prefix of the per-issue work branch
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Branch approved work is merged into
    #[serde(default = "default_target_branch")]
    pub target_branch: String,

    /// Merge the work branch when review approves
    #[serde(default = "default_true")]
    pub auto_merge: bool,
}

fn default_branch_prefix() -> String {
    "shepherd/issue-".to_string()
}

fn default_target_branch() -> String {
    "main".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            target_branch: default_target_branch(),
            auto_merge: default_true(),
        }
    }
}

impl VcsConfig {
    pub fn work_branch(&self, issue_id: &str) -> String {
        format!("{}{}", self.branch_prefix, issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_fallbacks() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.pipeline.initial_poll(), Duration::from_secs(10));
        assert_eq!(config.pipeline.max_poll(), Duration::from_secs(60));
        assert_eq!(config.pipeline.timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.ci_client.max_attempts, 3);
    }

    #[test]
    fn test_agent_profile_overrides() {
        let mut agent = AgentConfig {
            model: Some("base-model".to_string()),
            ..AgentConfig::default()
        };
        agent.per_stage.insert(
            Stage::Reviewing,
            AgentOverride {
                max_turns: Some(5),
                ..AgentOverride::default()
            },
        );

        let review = agent.profile_for(Stage::Reviewing);
        assert_eq!(review.max_turns, 5);
        assert_eq!(review.model.as_deref(), Some("base-model"));

        let coding = agent.profile_for(Stage::Coding);
        assert_eq!(coding.max_turns, 25);
        assert_eq!(coding.wall_clock, Duration::from_secs(1800));
    }

    #[test]
    fn test_work_branch_uses_prefix() {
        assert_eq!(VcsConfig::default().work_branch("I1"), "shepherd/issue-I1");
    }
}
