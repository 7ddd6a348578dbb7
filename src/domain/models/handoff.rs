//! Context hand-off payloads passed between stages.
//!
//! Every entry is a tagged variant naming the stage that produced it, so a
//! consuming stage can never silently misread a producer's shape.

use serde::{Deserialize, Serialize};

use super::issue::Stage;
use super::outcome::FailureClass;
use super::pipeline::{JobFailure, PipelineId};

/// Output of the planning stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    /// Paths the plan expects to touch
    #[serde(default)]
    pub files: Vec<String>,
}

/// Output of a stage that pushed a commit (coding or testing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutput {
    pub summary: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Output of the review stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub decision: ReviewDecision,
    pub summary: String,
    #[serde(default)]
    pub comments: Vec<String>,
}

/// Pipeline failure feedback handed back to the stage that will retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiFailureReport {
    pub pipeline_id: PipelineId,
    pub commit_sha: String,
    pub class: FailureClass,
    #[serde(default)]
    pub failed_jobs: Vec<JobFailure>,
}

/// One hand-off entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Plan(PlanOutput),
    Code(ChangeOutput),
    Test(ChangeOutput),
    Review(ReviewOutput),
    CiFailure(CiFailureReport),
}

impl StageOutput {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Plan(_) => "plan",
            Self::Code(_) => "code",
            Self::Test(_) => "test",
            Self::Review(_) => "review",
            Self::CiFailure(_) => "ci_failure",
        }
    }

    pub fn commit_sha(&self) -> Option<&str> {
        match self {
            Self::Code(change) | Self::Test(change) => Some(&change.commit_sha),
            Self::CiFailure(report) => Some(&report.commit_sha),
            Self::Plan(_) | Self::Review(_) => None,
        }
    }
}

/// The ordered entries a consuming stage reads from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffContext {
    pub stage: Stage,
    pub entries: Vec<StageOutput>,
}

impl HandoffContext {
    pub fn new(stage: Stage, entries: Vec<StageOutput>) -> Self {
        Self { stage, entries }
    }

    pub fn plan(&self) -> Option<&PlanOutput> {
        self.entries.iter().rev().find_map(|entry| match entry {
            StageOutput::Plan(plan) => Some(plan),
            _ => None,
        })
    }

    /// Most recent code or test change.
    pub fn latest_change(&self) -> Option<&ChangeOutput> {
        self.entries.iter().rev().find_map(|entry| match entry {
            StageOutput::Code(change) | StageOutput::Test(change) => Some(change),
            _ => None,
        })
    }

    pub fn ci_failures(&self) -> impl Iterator<Item = &CiFailureReport> {
        self.entries.iter().filter_map(|entry| match entry {
            StageOutput::CiFailure(report) => Some(report),
            _ => None,
        })
    }

    pub fn reviews(&self) -> impl Iterator<Item = &ReviewOutput> {
        self.entries.iter().filter_map(|entry| match entry {
            StageOutput::Review(review) => Some(review),
            _ => None,
        })
    }

    /// Kind of entry a stage cannot start without, if any.
    pub const fn required_kind(stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::Coding => Some("plan"),
            Stage::Testing | Stage::Reviewing | Stage::AwaitingPipeline => Some("change"),
            _ => None,
        }
    }

    /// Check that the entry this stage depends on is present.
    pub fn is_well_formed(&self) -> bool {
        match Self::required_kind(self.stage) {
            Some("plan") => self.plan().is_some(),
            Some(_) => self.latest_change().is_some(),
            None => true,
        }
    }
}

/// Structured result of one agent stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Success(StageOutput),
    Retryable(String),
    Fatal { class: FailureClass, reason: String },
}

impl StageResult {
    pub fn fatal(class: FailureClass, reason: impl Into<String>) -> Self {
        Self::Fatal {
            class,
            reason: reason.into(),
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }
}
