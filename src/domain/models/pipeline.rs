//! CI pipeline models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::issue::IssueId;

/// Opaque, backend-assigned pipeline identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipelineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Status of a pipeline or one of its jobs as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl PipelineStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One CI execution tied to a specific commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: PipelineId,
    pub commit_sha: String,
    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(id: PipelineId, commit_sha: impl Into<String>, status: PipelineStatus) -> Self {
        Self {
            id,
            commit_sha: commit_sha.into(),
            status,
            created_at: Utc::now(),
        }
    }
}

/// A job inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: String,
    pub name: String,
    pub status: PipelineStatus,
}

/// Backend view of a pipeline at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub id: PipelineId,
    pub status: PipelineStatus,
    #[serde(default)]
    pub jobs: Vec<PipelineJob>,
}

/// A status event delivered by the backend (webhook or push).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub issue_id: IssueId,
    pub pipeline_id: PipelineId,
    pub status: PipelineStatus,
}

/// A failed job together with the tail of its trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub job_id: String,
    pub name: String,
    pub trace_excerpt: String,
}

/// Terminal classification of an awaited pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Succeeded,
    Failed { failed_jobs: Vec<JobFailure> },
    Canceled,
    /// No terminal status within the ceiling; the run was canceled.
    TimedOut,
    /// A newer commit replaced the run while it was awaited.
    Superseded,
}

impl PipelineOutcome {
    /// Whether the outcome counts as a failure for transition purposes.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Canceled | Self::TimedOut)
    }
}
