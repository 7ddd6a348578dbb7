//! Mock agent runtime for testing.
//!
//! Behaviour is scripted per `(stage, attempt)`, falling back to a per-stage
//! default and then to a built-in happy path. Because scripts are keyed by the
//! attempt number the supervisor passes in, replaying a workflow after a
//! restart reproduces the same agent behaviour.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::models::{IssueId, ReviewDecision, Stage};
use crate::domain::ports::{
    AgentError, AgentReply, AgentRequest, AgentRuntime, AgentSignal, AgentTools, CompletionReport,
};

/// Scripted behaviour of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentScript {
    /// Files committed to the work branch on the first turn
    pub commits: Vec<String>,
    /// Reply per turn; the last reply repeats
    pub replies: Vec<AgentReply>,
    /// Delay before every turn
    pub delay: Option<Duration>,
    /// Error returned instead of a reply
    pub error: Option<AgentError>,
}

impl AgentScript {
    pub fn replies(replies: Vec<AgentReply>) -> Self {
        Self {
            commits: Vec::new(),
            replies,
            delay: None,
            error: None,
        }
    }

    /// Complete successfully without committing.
    pub fn succeed() -> Self {
        Self::replies(vec![AgentReply::Complete(AgentSignal::Success(
            CompletionReport {
                summary: "done".to_string(),
                steps: vec!["implement the change".to_string()],
                ..CompletionReport::default()
            },
        ))])
    }

    /// Commit `path` on the first turn, then complete successfully.
    pub fn commit_and_succeed(path: &str) -> Self {
        let mut script = Self::succeed();
        script.commits.push(path.to_string());
        script
    }

    pub fn review(decision: ReviewDecision) -> Self {
        Self::replies(vec![AgentReply::Complete(AgentSignal::Success(
            CompletionReport {
                summary: format!("review: {decision:?}"),
                decision: Some(decision),
                comments: match decision {
                    ReviewDecision::Approve => Vec::new(),
                    ReviewDecision::Reject => vec!["missing error handling".to_string()],
                },
                ..CompletionReport::default()
            },
        ))])
    }

    pub fn retry(reason: &str) -> Self {
        Self::replies(vec![AgentReply::Complete(AgentSignal::Retry {
            reason: reason.to_string(),
        })])
    }

    pub fn error(error: AgentError) -> Self {
        Self {
            error: Some(error),
            ..Self::replies(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn builtin(stage: Stage) -> Self {
        match stage {
            Stage::Coding => Self::commit_and_succeed("src/lib.rs"),
            Stage::Testing => Self::commit_and_succeed("tests/integration.rs"),
            Stage::Reviewing => Self::review(ReviewDecision::Approve),
            _ => Self::succeed(),
        }
    }
}

/// One recorded invocation (first turn only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub issue_id: IssueId,
    pub stage: Stage,
    pub attempt: u32,
    pub context_kinds: Vec<&'static str>,
}

#[derive(Debug, Default)]
struct MockAgentState {
    scripted: HashMap<(Stage, u32), AgentScript>,
    defaults: HashMap<Stage, AgentScript>,
    invocations: Vec<Invocation>,
}

#[derive(Debug, Default)]
pub struct MockAgentRuntime {
    state: Mutex<MockAgentState>,
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockAgentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script the invocation of `stage` at `attempt`.
    pub fn script(&self, stage: Stage, attempt: u32, script: AgentScript) {
        self.state().scripted.insert((stage, attempt), script);
    }

    /// Script every invocation of `stage` not covered by [`Self::script`].
    pub fn always(&self, stage: Stage, script: AgentScript) {
        self.state().defaults.insert(stage, script);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state().invocations.clone()
    }

    fn script_for(&self, stage: Stage, attempt: u32) -> AgentScript {
        let state = self.state();
        state
            .scripted
            .get(&(stage, attempt))
            .or_else(|| state.defaults.get(&stage))
            .cloned()
            .unwrap_or_else(|| AgentScript::builtin(stage))
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn turn(
        &self,
        request: &AgentRequest,
        transcript: &[String],
        tools: &AgentTools,
    ) -> Result<AgentReply, AgentError> {
        let script = self.script_for(request.stage, request.attempt);
        let turn = transcript.len();

        if turn == 0 {
            self.state().invocations.push(Invocation {
                issue_id: request.issue_id.clone(),
                stage: request.stage,
                attempt: request.attempt,
                context_kinds: request.context.iter().map(|entry| entry.kind()).collect(),
            });
        }

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = script.error {
            return Err(error);
        }

        if turn == 0 {
            for path in &script.commits {
                tools
                    .vcs
                    .create_or_update_file(
                        &request.work_branch,
                        path,
                        "// generated",
                        &format!("{}: {}", request.stage, request.issue_id),
                    )
                    .await
                    .map_err(|err| AgentError::Failed(err.to_string()))?;
            }
        }

        script
            .replies
            .get(turn)
            .or_else(|| script.replies.last())
            .cloned()
            .ok_or_else(|| AgentError::Failed("mock agent has no scripted reply".to_string()))
    }
}
