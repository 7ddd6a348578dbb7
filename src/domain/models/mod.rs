pub mod config;
pub mod handoff;
pub mod issue;
pub mod outcome;
pub mod pipeline;
pub mod transition;

pub use config::{
    AgentConfig, AgentOverride, AgentProfile, CiClientConfig, Config, DatabaseConfig, LogFormat,
    LoggingConfig, PipelineConfig, RetryConfig, RotationPolicy, VcsConfig,
};
pub use handoff::{
    ChangeOutput, CiFailureReport, HandoffContext, PlanOutput, ReviewDecision, ReviewOutput,
    StageOutput, StageResult,
};
pub use issue::{Issue, IssueId, Stage};
pub use outcome::{FailureClass, LastOutcome, Outcome};
pub use pipeline::{
    JobFailure, PipelineEvent, PipelineId, PipelineJob, PipelineOutcome, PipelineRun,
    PipelineSnapshot, PipelineStatus,
};
pub use transition::Trigger;
