//! Issue and stage models.
//!
//! An [`Issue`] is the unit of work the supervisor drives through the fixed
//! delivery stages. It is created when a workflow starts, mutated only by the
//! supervisor, and archived once it reaches a terminal stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::outcome::{LastOutcome, Outcome};
use super::pipeline::PipelineRun;

/// Identifier of an issue in the external tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for IssueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A named phase of the fixed delivery workflow.
///
/// ```text
/// Planning → Coding → AwaitingPipeline → Testing → AwaitingPipeline → Reviewing → Merged
///               ↑            │ failed                    │ failed          │ rejected
///               └────────────┘                Testing ←──┘      Coding ←───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Coding,
    Testing,
    AwaitingPipeline,
    Reviewing,
    Merged,
    Failed,
    Cancelled,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Testing => "testing",
            Self::AwaitingPipeline => "awaiting_pipeline",
            Self::Reviewing => "reviewing",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "coding" => Some(Self::Coding),
            "testing" => Some(Self::Testing),
            "awaiting_pipeline" | "awaitingpipeline" => Some(Self::AwaitingPipeline),
            "reviewing" => Some(Self::Reviewing),
            "merged" => Some(Self::Merged),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Failed | Self::Cancelled)
    }

    /// Whether an agent role runs in this stage.
    pub const fn is_agent_stage(&self) -> bool {
        matches!(
            self,
            Self::Planning | Self::Coding | Self::Testing | Self::Reviewing
        )
    }

    /// Hand-off slots whose contents derive from this stage's branch state.
    ///
    /// When this stage mutates the work branch these slots are stale.
    pub const fn downstream(&self) -> &'static [Stage] {
        match self {
            Self::Planning => &[
                Self::Coding,
                Self::AwaitingPipeline,
                Self::Testing,
                Self::Reviewing,
            ],
            Self::Coding => &[Self::AwaitingPipeline, Self::Testing, Self::Reviewing],
            Self::Testing => &[Self::AwaitingPipeline, Self::Reviewing],
            _ => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-issue workflow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker identifier
    pub id: IssueId,
    /// Identifies one start of the workflow; a restart gets a new one
    pub run_id: Uuid,
    /// Current stage
    pub stage: Stage,
    /// Stage that submitted the pipeline being awaited
    pub pipeline_origin: Option<Stage>,
    /// Retry budget consumed per stage
    pub retry_counts: BTreeMap<Stage, u32>,
    /// Branch the agents commit to
    pub work_branch: String,
    /// Head commit produced by the most recent committing stage
    pub last_commit_sha: Option<String>,
    /// Pipeline run validating `last_commit_sha`
    pub tracked_pipeline: Option<PipelineRun>,
    /// Most recent classification, for operators
    pub last_outcome: Option<LastOutcome>,
    /// Terminal outcome, unset until done
    pub outcome: Option<Outcome>,
    /// Diagnostic recorded on unrecoverable failure
    pub diagnostic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(id: IssueId, work_branch: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            run_id: Uuid::new_v4(),
            stage: Stage::Planning,
            pipeline_origin: None,
            retry_counts: BTreeMap::new(),
            work_branch: work_branch.into(),
            last_commit_sha: None,
            tracked_pipeline: None,
            last_outcome: None,
            outcome: None,
            diagnostic: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn retry_count(&self, stage: Stage) -> u32 {
        self.retry_counts.get(&stage).copied().unwrap_or(0)
    }

    pub const fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
