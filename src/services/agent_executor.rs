//! Agent stage execution.
//!
//! Runs one agent role for one stage attempt under a turn budget, a
//! wall-clock budget and a cancellation token, and reduces whatever the
//! agent produced to a [`StageResult`]. Free text without a
//! machine-readable completion marker is never treated as success.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{
    ChangeOutput, FailureClass, PlanOutput, ReviewOutput, Stage, StageOutput, StageResult,
};
use crate::domain::ports::{
    AgentError, AgentReply, AgentRequest, AgentRuntime, AgentSignal, AgentTools, CompletionReport,
    VcsBackend, VcsError,
};

/// Line prefix an agent uses to embed its completion signal in free text.
pub const COMPLETION_MARKER: &str = "STAGE_RESULT:";

/// The invocation was cancelled before it produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("agent invocation cancelled")]
pub struct Cancelled;

enum Conversation {
    Signal(AgentSignal),
    Unstructured,
    TurnsExhausted(u32),
}

pub struct AgentExecutor {
    runtime: Arc<dyn AgentRuntime>,
    vcs: Arc<dyn VcsBackend>,
}

impl AgentExecutor {
    pub fn new(runtime: Arc<dyn AgentRuntime>, vcs: Arc<dyn VcsBackend>) -> Self {
        Self { runtime, vcs }
    }

    /// Run the agent for `request.stage`.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires first; any partial work is
    /// discarded.
    pub async fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<StageResult, Cancelled> {
        if !request.stage.is_agent_stage() {
            return Ok(StageResult::fatal(
                FailureClass::Configuration,
                format!("no agent role for stage {}", request.stage),
            ));
        }

        let recorder = Arc::new(RecordingVcs::new(
            self.vcs.clone(),
            request.work_branch.clone(),
        ));
        let tools = AgentTools {
            vcs: recorder.clone(),
        };

        tracing::info!(
            issue_id = %request.issue_id,
            stage = %request.stage,
            attempt = request.attempt,
            runtime = self.runtime.name(),
            "agent invocation started"
        );

        let conversation = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(issue_id = %request.issue_id, stage = %request.stage, "agent invocation cancelled");
                return Err(Cancelled);
            }
            result = tokio::time::timeout(request.profile.wall_clock, self.converse(request, &tools)) => result,
        };

        let result = match conversation {
            Err(_) => StageResult::retryable(format!(
                "wall-clock budget of {}s exhausted",
                request.profile.wall_clock.as_secs()
            )),
            Ok(Err(AgentError::Configuration(reason))) => {
                StageResult::fatal(FailureClass::Configuration, reason)
            }
            Ok(Err(err)) => StageResult::retryable(err.to_string()),
            Ok(Ok(Conversation::TurnsExhausted(turns))) => {
                StageResult::retryable(format!("turn budget of {turns} exhausted without completion"))
            }
            Ok(Ok(Conversation::Unstructured)) => {
                StageResult::retryable("no machine-readable completion marker")
            }
            Ok(Ok(Conversation::Signal(signal))) => {
                into_stage_result(request, signal, recorder.last_commit())
            }
        };

        match &result {
            StageResult::Success(output) => tracing::info!(
                issue_id = %request.issue_id,
                stage = %request.stage,
                kind = output.kind(),
                "agent invocation succeeded"
            ),
            StageResult::Retryable(reason) => tracing::warn!(
                issue_id = %request.issue_id,
                stage = %request.stage,
                %reason,
                "agent invocation retryable"
            ),
            StageResult::Fatal { class, reason } => tracing::error!(
                issue_id = %request.issue_id,
                stage = %request.stage,
                %class,
                %reason,
                "agent invocation failed"
            ),
        }
        Ok(result)
    }

    async fn converse(
        &self,
        request: &AgentRequest,
        tools: &AgentTools,
    ) -> Result<Conversation, AgentError> {
        let mut transcript = Vec::new();
        for _ in 0..request.profile.max_turns {
            match self.runtime.turn(request, &transcript, tools).await? {
                AgentReply::Continue(text) => transcript.push(text),
                AgentReply::Complete(signal) => return Ok(Conversation::Signal(signal)),
                AgentReply::Final(text) => {
                    return Ok(match parse_completion(&text) {
                        Some(signal) => Conversation::Signal(signal),
                        None => Conversation::Unstructured,
                    })
                }
            }
        }
        Ok(Conversation::TurnsExhausted(request.profile.max_turns))
    }
}

/// Extract a completion signal from free-form agent output.
///
/// Accepts either a `STAGE_RESULT:` line followed by JSON, or output that is
/// itself a JSON object with a `status` field.
pub fn parse_completion(text: &str) -> Option<AgentSignal> {
    for line in text.lines().rev() {
        if let Some(payload) = line.trim().strip_prefix(COMPLETION_MARKER) {
            return serde_json::from_str(payload.trim()).ok();
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).ok();
    }
    None
}

fn into_stage_result(
    request: &AgentRequest,
    signal: AgentSignal,
    recorded_commit: Option<String>,
) -> StageResult {
    let stage = request.stage;
    let report = match signal {
        AgentSignal::Success(report) => report,
        AgentSignal::Retry { reason } => return StageResult::Retryable(reason),
        AgentSignal::Fatal { reason } => return StageResult::fatal(FailureClass::AgentFatal, reason),
    };

    let CompletionReport {
        summary,
        steps,
        files,
        commit_sha,
        decision,
        comments,
    } = report;

    match stage {
        Stage::Planning => StageResult::Success(StageOutput::Plan(PlanOutput {
            summary,
            steps,
            files,
        })),
        Stage::Coding | Stage::Testing => {
            let Some(commit_sha) = head_commit(request, recorded_commit, commit_sha) else {
                return StageResult::retryable(format!("{stage} completed without a commit"));
            };
            let change = ChangeOutput {
                summary,
                files,
                commit_sha,
            };
            StageResult::Success(if stage == Stage::Coding {
                StageOutput::Code(change)
            } else {
                StageOutput::Test(change)
            })
        }
        Stage::Reviewing => match decision {
            Some(decision) => StageResult::Success(StageOutput::Review(ReviewOutput {
                decision,
                summary,
                comments,
            })),
            None => StageResult::retryable("review completed without a decision"),
        },
        other => StageResult::fatal(
            FailureClass::Configuration,
            format!("no agent role for stage {other}"),
        ),
    }
}

/// The commit observed on the work branch wins over the one the agent claims.
fn head_commit(
    request: &AgentRequest,
    recorded: Option<String>,
    claimed: Option<String>,
) -> Option<String> {
    match (recorded, claimed) {
        (Some(recorded), Some(claimed)) if recorded != claimed => {
            tracing::warn!(
                issue_id = %request.issue_id,
                stage = %request.stage,
                recorded = %recorded,
                claimed = %claimed,
                "agent reported a commit other than the branch head, using the recorded one"
            );
            Some(recorded)
        }
        (Some(recorded), _) => Some(recorded),
        (None, claimed) => claimed,
    }
}

/// VCS wrapper that remembers the commits an agent makes on the work branch.
struct RecordingVcs {
    inner: Arc<dyn VcsBackend>,
    branch: String,
    commits: Mutex<Vec<String>>,
}

impl RecordingVcs {
    fn new(inner: Arc<dyn VcsBackend>, branch: String) -> Self {
        Self {
            inner,
            branch,
            commits: Mutex::new(Vec::new()),
        }
    }

    fn last_commit(&self) -> Option<String> {
        self.commits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl VcsBackend for RecordingVcs {
    async fn create_or_update_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, VcsError> {
        let sha = self
            .inner
            .create_or_update_file(branch, path, content, message)
            .await?;
        if branch == self.branch {
            self.commits
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(sha.clone());
        }
        Ok(sha)
    }

    async fn merge_branch(&self, source: &str, target: &str) -> Result<String, VcsError> {
        self.inner.merge_branch(source, target).await
    }
}
