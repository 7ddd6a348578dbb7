//! Deterministic workflow transition table.
//!
//! The table is a pure function of the current stage, the stage that
//! submitted the awaited pipeline, the trigger, and whether the retry
//! budget allowed another attempt. The supervisor owns every side effect.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::issue::Stage;
use crate::domain::errors::{DomainError, DomainResult};

/// Event that moves an issue out of its current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    PlanProduced,
    CommitPushed,
    PipelineSucceeded,
    PipelineFailed,
    Approved,
    Rejected,
    /// The stage asked to be re-run
    Retryable,
    Unrecoverable,
    ExternalCancel,
}

impl Trigger {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PlanProduced => "plan_produced",
            Self::CommitPushed => "commit_pushed",
            Self::PipelineSucceeded => "pipeline_succeeded",
            Self::PipelineFailed => "pipeline_failed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Retryable => "retryable",
            Self::Unrecoverable => "unrecoverable",
            Self::ExternalCancel => "external_cancel",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budget a trigger draws from, if any.
pub const fn budget_key(current: Stage, origin: Option<Stage>, trigger: Trigger) -> Option<Stage> {
    match (current, trigger) {
        (Stage::AwaitingPipeline, Trigger::PipelineFailed | Trigger::Retryable) => origin,
        (Stage::Reviewing, Trigger::Rejected) => Some(Stage::Reviewing),
        (stage, Trigger::Retryable) if stage.is_agent_stage() => Some(stage),
        _ => None,
    }
}

/// Next stage for `trigger` in `current`.
///
/// `budget_available` is only consulted for triggers that have a
/// [`budget_key`]; exhaustion always lands in `Failed`.
pub fn next_stage(
    current: Stage,
    origin: Option<Stage>,
    trigger: Trigger,
    budget_available: bool,
) -> DomainResult<Stage> {
    let invalid = |reason: &str| DomainError::InvalidStateTransition {
        from: current,
        trigger: trigger.to_string(),
        reason: reason.to_string(),
    };

    if current.is_terminal() {
        return Err(invalid("stage is terminal"));
    }

    let next = match (current, trigger) {
        (_, Trigger::ExternalCancel) => Stage::Cancelled,
        (_, Trigger::Unrecoverable) => Stage::Failed,

        (Stage::Planning, Trigger::PlanProduced) => Stage::Coding,
        (Stage::Coding | Stage::Testing, Trigger::CommitPushed) => Stage::AwaitingPipeline,

        (Stage::AwaitingPipeline, Trigger::PipelineSucceeded) => match origin {
            Some(Stage::Coding) => Stage::Testing,
            Some(Stage::Testing) => Stage::Reviewing,
            _ => return Err(invalid("awaited pipeline has no committing origin")),
        },
        (Stage::AwaitingPipeline, Trigger::PipelineFailed) => match origin {
            Some(stage @ (Stage::Coding | Stage::Testing)) if budget_available => stage,
            Some(Stage::Coding | Stage::Testing) => Stage::Failed,
            _ => return Err(invalid("awaited pipeline has no committing origin")),
        },

        (Stage::Reviewing, Trigger::Approved) => Stage::Merged,
        (Stage::Reviewing, Trigger::Rejected) if budget_available => Stage::Coding,
        (Stage::Reviewing, Trigger::Rejected) => Stage::Failed,

        (stage, Trigger::Retryable) if budget_available => stage,
        (_, Trigger::Retryable) => Stage::Failed,

        _ => return Err(invalid("trigger does not apply to this stage")),
    };

    Ok(next)
}
