//! Agent runtime port - interface for LLM agent backends.
//!
//! The runtime is driven one turn at a time by the agent executor, which
//! owns the turn budget, the wall-clock budget and cancellation. A runtime
//! only has to answer a single turn given the transcript so far.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::vcs_backend::VcsBackend;
use crate::domain::models::{AgentProfile, IssueId, ReviewDecision, Stage, StageOutput};

/// Errors raised by an agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Rate limit or dropped connection
    #[error("Transient agent error: {0}")]
    Transient(String),

    /// Missing credentials or unknown model; retrying cannot help
    #[error("Agent configuration error: {0}")]
    Configuration(String),

    #[error("Agent invocation failed: {0}")]
    Failed(String),
}

/// Everything an agent needs for one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub issue_id: IssueId,
    pub stage: Stage,
    /// Zero-based attempt number, equal to the stage's consumed retry budget
    pub attempt: u32,
    pub work_branch: String,
    pub context: Vec<StageOutput>,
    pub profile: AgentProfile,
}

/// Tools an agent may call while it works.
#[derive(Clone)]
pub struct AgentTools {
    pub vcs: Arc<dyn VcsBackend>,
}

/// Payload of a successful completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub decision: Option<ReviewDecision>,
    #[serde(default)]
    pub comments: Vec<String>,
}

/// Machine-readable completion signal an agent emits when it is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentSignal {
    Success(CompletionReport),
    Retry { reason: String },
    Fatal { reason: String },
}

/// Reply to a single turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentReply {
    /// Intermediate output; the agent wants another turn
    Continue(String),
    /// A structured completion signal
    Complete(AgentSignal),
    /// The agent stopped with free text, which may embed a completion marker
    Final(String),
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Runtime name for logs.
    fn name(&self) -> &'static str;

    /// Produce the next turn for `request`.
    async fn turn(
        &self,
        request: &AgentRequest,
        transcript: &[String],
        tools: &AgentTools,
    ) -> Result<AgentReply, AgentError>;
}
