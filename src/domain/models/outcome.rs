//! Outcome classification recorded on issues.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::issue::Stage;
use super::pipeline::PipelineId;

/// Failure taxonomy shared by stage results and status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network blip or slow runner that outlived the I/O-level retries
    TransientInfra,
    /// Tests failed, build broke, review rejected
    StageFailure,
    /// Pipeline exceeded its ceiling
    TimedOut,
    /// Missing credentials or malformed hand-off; never consumes budget
    Configuration,
    /// The agent declared the work impossible
    AgentFatal,
    /// A stage ran out of retry budget
    RetryBudgetExhausted,
}

impl FailureClass {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransientInfra => "transient_infra",
            Self::StageFailure => "stage_failure",
            Self::TimedOut => "timed_out",
            Self::Configuration => "configuration",
            Self::AgentFatal => "agent_fatal",
            Self::RetryBudgetExhausted => "retry_budget_exhausted",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Merged { merge_sha: Option<String> },
    Failed { class: FailureClass, reason: String },
    Cancelled,
}

/// The last classification the supervisor recorded for an issue.
///
/// Lets operators tell "still retrying" apart from "permanently failed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LastOutcome {
    StageCompleted {
        stage: Stage,
    },
    PipelineSucceeded {
        pipeline_id: PipelineId,
    },
    Retrying {
        stage: Stage,
        class: FailureClass,
        reason: String,
    },
    Merged {
        merge_sha: Option<String>,
    },
    Failed {
        class: FailureClass,
        reason: String,
    },
    Cancelled,
}

impl LastOutcome {
    pub fn summary(&self) -> String {
        match self {
            Self::StageCompleted { stage } => format!("{stage} completed"),
            Self::PipelineSucceeded { pipeline_id } => format!("pipeline {pipeline_id} succeeded"),
            Self::Retrying {
                stage,
                class,
                reason,
            } => format!("retrying {stage} after {class}: {reason}"),
            Self::Merged { merge_sha } => match merge_sha {
                Some(sha) => format!("merged as {sha}"),
                None => "merged".to_string(),
            },
            Self::Failed { class, reason } => format!("failed ({class}): {reason}"),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}
