//! Per-issue workflow state machine.
//!
//! The supervisor owns every side effect of a transition: it runs the
//! current stage (agent or pipeline wait), feeds the result through the
//! transition table, consults the retry governor, and persists the issue
//! after every transition. Each issue has its own worker whose lock
//! serializes `advance` calls for that issue only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::agent_executor::AgentExecutor;
use super::context_cache::{CacheError, ContextCache};
use super::pipeline_monitor::{EventDisposition, MonitorError, PipelineMonitor};
use super::resilient_ci::ResilientCiClient;
use super::retry_governor::RetryGovernor;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::transition::{budget_key, next_stage};
use crate::domain::models::{
    CiFailureReport, Config, FailureClass, Issue, IssueId, LastOutcome, Outcome, PipelineEvent,
    PipelineId, PipelineOutcome, PipelineRun, ReviewDecision, Stage, StageOutput, StageResult,
    Trigger, VcsConfig,
};
use crate::domain::ports::{
    AgentRequest, AgentRuntime, CiBackend, HandoffStore, VcsBackend, WorkflowStore,
};

/// External collaborators the supervisor drives.
#[derive(Clone)]
pub struct Backends {
    pub ci: Arc<dyn CiBackend>,
    pub vcs: Arc<dyn VcsBackend>,
    pub agent: Arc<dyn AgentRuntime>,
    pub store: Arc<dyn WorkflowStore>,
    /// Durable hand-offs; in-memory only when unset
    pub handoffs: Option<Arc<dyn HandoffStore>>,
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub issue_id: IssueId,
    pub from: Stage,
    pub to: Stage,
    /// `None` when the issue did not move
    pub trigger: Option<Trigger>,
    pub outcome: Option<LastOutcome>,
}

impl Transition {
    fn hold(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id.clone(),
            from: issue.stage,
            to: issue.stage,
            trigger: None,
            outcome: issue.last_outcome.clone(),
        }
    }
}

/// Operator-facing view of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub issue_id: IssueId,
    pub stage: Stage,
    pub pipeline_origin: Option<Stage>,
    pub retry_counts: BTreeMap<Stage, u32>,
    pub last_outcome: Option<LastOutcome>,
    pub outcome: Option<Outcome>,
    pub last_commit_sha: Option<String>,
    pub tracked_pipeline_id: Option<PipelineId>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Issue> for StatusReport {
    fn from(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id.clone(),
            stage: issue.stage,
            pipeline_origin: issue.pipeline_origin,
            retry_counts: issue.retry_counts.clone(),
            last_outcome: issue.last_outcome.clone(),
            outcome: issue.outcome.clone(),
            last_commit_sha: issue.last_commit_sha.clone(),
            tracked_pipeline_id: issue.tracked_pipeline.as_ref().map(|run| run.id.clone()),
            updated_at: issue.updated_at,
        }
    }
}

/// What running the current stage produced.
enum Step {
    Completed {
        trigger: Trigger,
        report: LastOutcome,
    },
    /// A failure the transition table may retry, charged to a budget
    Failed {
        trigger: Trigger,
        class: FailureClass,
        reason: String,
    },
    Unrecoverable {
        class: FailureClass,
        reason: String,
    },
    /// The awaited run was superseded; nothing to apply
    Hold,
    Cancelled,
}

impl Step {
    fn configuration(reason: impl Into<String>) -> Self {
        Self::Unrecoverable {
            class: FailureClass::Configuration,
            reason: reason.into(),
        }
    }
}

struct IssueWorker {
    state: tokio::sync::Mutex<Option<Issue>>,
    cancel: CancellationToken,
}

impl IssueWorker {
    fn new(issue: Option<Issue>) -> Self {
        Self {
            state: tokio::sync::Mutex::new(issue),
            cancel: CancellationToken::new(),
        }
    }
}

pub struct WorkflowSupervisor {
    config: Config,
    store: Arc<dyn WorkflowStore>,
    vcs: Arc<dyn VcsBackend>,
    cache: ContextCache,
    monitor: PipelineMonitor,
    executor: AgentExecutor,
    governor: RetryGovernor,
    workers: Mutex<HashMap<IssueId, Arc<IssueWorker>>>,
}

impl WorkflowSupervisor {
    pub fn new(config: Config, backends: Backends) -> Self {
        let ci: Arc<dyn CiBackend> = Arc::new(ResilientCiClient::new(
            backends.ci,
            config.ci_client.clone(),
        ));
        let cache = match backends.handoffs {
            Some(store) => ContextCache::with_store(store),
            None => ContextCache::new(),
        };

        Self {
            monitor: PipelineMonitor::new(ci, config.pipeline.clone()),
            executor: AgentExecutor::new(backends.agent, backends.vcs.clone()),
            governor: RetryGovernor::new(&config.retry),
            store: backends.store,
            vcs: backends.vcs,
            cache,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<IssueId, Arc<IssueWorker>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn worker(&self, id: &IssueId) -> Arc<IssueWorker> {
        self.workers()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(IssueWorker::new(None)))
            .clone()
    }

    /// Begin a fresh workflow for `id` in Planning.
    ///
    /// Fails with [`DomainError::AlreadyActive`] while a non-terminal
    /// workflow exists for the issue. A terminal one is replaced.
    pub async fn start_workflow(&self, id: &IssueId) -> DomainResult<StatusReport> {
        let worker = self.worker(id);
        let guard = worker.state.lock().await;
        let replaced = guard.is_some() || self.store.load(id).await?.is_some();
        let issue = enrol_issue(self.store.as_ref(), &self.config.vcs, id).await?;
        if replaced {
            // Live entries left by a merged or failed run are not context for this one.
            self.cache.clear(id).await.map_err(cache_to_domain)?;
        }

        let report = StatusReport::from(&issue);
        drop(guard);
        self.workers()
            .insert(id.clone(), Arc::new(IssueWorker::new(Some(issue))));
        Ok(report)
    }

    /// Drive the issue until it reaches a terminal stage.
    pub async fn run_workflow(&self, id: &IssueId) -> DomainResult<StatusReport> {
        loop {
            let transition = self.advance(id).await?;
            if transition.to.is_terminal() {
                break;
            }
        }
        self.get_status(id).await
    }

    /// Spawn a driver for every persisted non-terminal issue.
    pub async fn resume_all(
        self: &Arc<Self>,
    ) -> DomainResult<Vec<(IssueId, JoinHandle<DomainResult<StatusReport>>)>> {
        let active = self.store.list_active().await?;
        tracing::info!(count = active.len(), "resuming active workflows");

        Ok(active
            .into_iter()
            .map(|issue| {
                let supervisor = Arc::clone(self);
                let id = issue.id.clone();
                let handle = tokio::spawn({
                    let id = id.clone();
                    async move { supervisor.run_workflow(&id).await }
                });
                (id, handle)
            })
            .collect())
    }

    /// Cancel the issue's workflow, interrupting any in-flight stage.
    pub async fn cancel_workflow(&self, id: &IssueId) -> DomainResult<StatusReport> {
        let worker = self.worker(id);
        worker.cancel.cancel();

        let mut guard = worker.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_issue(id).await?);
        }
        let Some(issue) = guard.as_mut() else {
            return Err(DomainError::IssueNotFound(id.clone()));
        };
        if !issue.is_terminal() {
            self.apply(issue, Step::Cancelled).await?;
        }
        Ok(StatusReport::from(&*issue))
    }

    /// Current status, without waiting for an in-flight stage.
    pub async fn get_status(&self, id: &IssueId) -> DomainResult<StatusReport> {
        let worker = self.workers().get(id).cloned();
        if let Some(worker) = worker {
            if let Ok(guard) = worker.state.try_lock() {
                if let Some(issue) = guard.as_ref() {
                    return Ok(StatusReport::from(issue));
                }
            }
        }
        let issue = self.load_issue(id).await?;
        Ok(StatusReport::from(&issue))
    }

    /// Hand a pushed pipeline status event to the monitor.
    pub fn deliver_pipeline_event(&self, event: &PipelineEvent) -> EventDisposition {
        self.monitor.observe(event)
    }

    /// The pipeline run the monitor currently tracks for the issue.
    pub fn tracked_pipeline(&self, id: &IssueId) -> Option<PipelineRun> {
        self.monitor.tracked(id)
    }

    /// Hand-offs retained from a cancelled workflow.
    pub async fn sealed_handoffs(&self, id: &IssueId) -> DomainResult<Vec<(Stage, StageOutput)>> {
        self.cache.sealed(id).await.map_err(cache_to_domain)
    }

    /// Run the current stage and apply the resulting transition.
    #[instrument(skip(self), fields(issue_id = %id))]
    pub async fn advance(&self, id: &IssueId) -> DomainResult<Transition> {
        let worker = self.worker(id);
        let mut guard = worker.state.lock().await;
        if guard.is_none() {
            let issue = self.load_issue(id).await?;
            if let (false, Some(run)) = (issue.is_terminal(), issue.tracked_pipeline.clone()) {
                self.monitor.restore(id, run);
            }
            *guard = Some(issue);
        }
        let Some(issue) = guard.as_mut() else {
            return Err(DomainError::IssueNotFound(id.clone()));
        };

        if issue.is_terminal() {
            return Ok(Transition::hold(issue));
        }
        if worker.cancel.is_cancelled() {
            return self.apply(issue, Step::Cancelled).await;
        }

        let step = match issue.stage {
            Stage::Planning | Stage::Coding | Stage::Testing | Stage::Reviewing => {
                self.run_agent_stage(issue, &worker.cancel).await?
            }
            Stage::AwaitingPipeline => self.await_pipeline(issue, &worker.cancel).await?,
            Stage::Merged | Stage::Failed | Stage::Cancelled => Step::Hold,
        };
        self.apply(issue, step).await
    }

    async fn load_issue(&self, id: &IssueId) -> DomainResult<Issue> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| DomainError::IssueNotFound(id.clone()))
    }

    async fn run_agent_stage(
        &self,
        issue: &mut Issue,
        cancel: &CancellationToken,
    ) -> DomainResult<Step> {
        let stage = issue.stage;
        let context = if stage == Stage::Planning {
            Vec::new()
        } else {
            match self.cache.get(&issue.id, stage).await {
                Ok(context) => context.entries,
                Err(err) => return cache_failure(err),
            }
        };

        let request = AgentRequest {
            issue_id: issue.id.clone(),
            stage,
            attempt: issue.retry_count(stage),
            work_branch: issue.work_branch.clone(),
            context,
            profile: self.config.agent.profile_for(stage),
        };

        let output = match self.executor.run(&request, cancel).await {
            Err(_) => return Ok(Step::Cancelled),
            Ok(StageResult::Success(output)) => output,
            Ok(StageResult::Retryable(reason)) => {
                return Ok(Step::Failed {
                    trigger: Trigger::Retryable,
                    class: FailureClass::StageFailure,
                    reason,
                })
            }
            Ok(StageResult::Fatal { class, reason }) => {
                return Ok(Step::Unrecoverable { class, reason })
            }
        };

        match (stage, output) {
            (Stage::Planning, output @ StageOutput::Plan(_)) => {
                if let Err(err) = self.cache.put(&issue.id, Stage::Coding, output).await {
                    return cache_failure(err);
                }
                Ok(Step::Completed {
                    trigger: Trigger::PlanProduced,
                    report: LastOutcome::StageCompleted { stage },
                })
            }
            (Stage::Coding, output @ StageOutput::Code(_))
            | (Stage::Testing, output @ StageOutput::Test(_)) => {
                self.record_commit(issue, output).await
            }
            (Stage::Reviewing, StageOutput::Review(review)) => match review.decision {
                ReviewDecision::Approve => self.merge(issue).await,
                ReviewDecision::Reject => {
                    let reason = format!("review rejected: {}", review.summary);
                    if let Err(err) = self
                        .cache
                        .put(&issue.id, Stage::Coding, StageOutput::Review(review))
                        .await
                    {
                        return cache_failure(err);
                    }
                    Ok(Step::Failed {
                        trigger: Trigger::Rejected,
                        class: FailureClass::StageFailure,
                        reason,
                    })
                }
            },
            (stage, output) => Ok(Step::configuration(format!(
                "{stage} produced a {} hand-off",
                output.kind()
            ))),
        }
    }

    /// Bind a stage's commit to a pipeline and stage its hand-off.
    async fn record_commit(&self, issue: &mut Issue, output: StageOutput) -> DomainResult<Step> {
        let stage = issue.stage;
        let Some(commit_sha) = output.commit_sha().map(str::to_string) else {
            return Ok(Step::configuration(format!("{stage} output has no commit")));
        };

        if let Err(err) = self.cache.invalidate(&issue.id, stage.downstream()).await {
            return cache_failure(err);
        }
        if let Err(err) = self
            .cache
            .put(&issue.id, Stage::AwaitingPipeline, output)
            .await
        {
            return cache_failure(err);
        }

        issue.last_commit_sha = Some(commit_sha.clone());
        issue.tracked_pipeline = match self
            .monitor
            .submit(&issue.id, &issue.work_branch, &commit_sha)
            .await
        {
            Ok(run) => Some(run),
            Err(err) => {
                // The wait stage resubmits the commit.
                tracing::warn!(issue_id = %issue.id, commit_sha, error = %err, "pipeline submit failed");
                None
            }
        };

        Ok(Step::Completed {
            trigger: Trigger::CommitPushed,
            report: LastOutcome::StageCompleted { stage },
        })
    }

    async fn merge(&self, issue: &Issue) -> DomainResult<Step> {
        if !self.config.vcs.auto_merge {
            return Ok(Step::Completed {
                trigger: Trigger::Approved,
                report: LastOutcome::Merged { merge_sha: None },
            });
        }

        match self
            .vcs
            .merge_branch(&issue.work_branch, &self.config.vcs.target_branch)
            .await
        {
            Ok(sha) => Ok(Step::Completed {
                trigger: Trigger::Approved,
                report: LastOutcome::Merged {
                    merge_sha: Some(sha),
                },
            }),
            Err(err) => Ok(Step::Failed {
                trigger: Trigger::Retryable,
                class: FailureClass::StageFailure,
                reason: format!("merge failed: {err}"),
            }),
        }
    }

    async fn await_pipeline(
        &self,
        issue: &mut Issue,
        cancel: &CancellationToken,
    ) -> DomainResult<Step> {
        let (Some(origin), Some(commit_sha)) = (issue.pipeline_origin, issue.last_commit_sha.clone())
        else {
            return Ok(Step::configuration(
                "awaiting a pipeline without a committing stage",
            ));
        };

        let run = match self
            .monitor
            .tracked(&issue.id)
            .filter(|run| run.commit_sha == commit_sha)
        {
            Some(run) => run,
            None => match self
                .monitor
                .submit(&issue.id, &issue.work_branch, &commit_sha)
                .await
            {
                Ok(run) => run,
                Err(err) => return Ok(monitor_failure(err)),
            },
        };
        issue.tracked_pipeline = Some(run.clone());

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(Step::Cancelled),
            outcome = self.monitor.await_outcome(&issue.id, &run.id, self.config.pipeline.timeout()) => outcome,
        };
        if let Some(latest) = self.monitor.tracked(&issue.id) {
            issue.tracked_pipeline = Some(latest);
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => return Ok(monitor_failure(err)),
        };

        let class = match &outcome {
            PipelineOutcome::Succeeded => {
                let next = if origin == Stage::Coding {
                    Stage::Testing
                } else {
                    Stage::Reviewing
                };
                if let Err(err) = self
                    .cache
                    .promote(&issue.id, Stage::AwaitingPipeline, next)
                    .await
                {
                    return cache_failure(err);
                }
                return Ok(Step::Completed {
                    trigger: Trigger::PipelineSucceeded,
                    report: LastOutcome::PipelineSucceeded {
                        pipeline_id: run.id,
                    },
                });
            }
            PipelineOutcome::Superseded => return Ok(Step::Hold),
            PipelineOutcome::TimedOut => FailureClass::TimedOut,
            PipelineOutcome::Failed { .. } | PipelineOutcome::Canceled => {
                FailureClass::StageFailure
            }
        };

        let failed_jobs = match outcome {
            PipelineOutcome::Failed { failed_jobs } => failed_jobs,
            _ => Vec::new(),
        };
        let reason = describe_failure(&run.id, class, &failed_jobs);
        let report = StageOutput::CiFailure(CiFailureReport {
            pipeline_id: run.id,
            commit_sha,
            class,
            failed_jobs,
        });
        if let Err(err) = self.cache.put(&issue.id, origin, report).await {
            return cache_failure(err);
        }

        Ok(Step::Failed {
            trigger: Trigger::PipelineFailed,
            class,
            reason,
        })
    }

    /// Feed a step through the transition table and persist the result.
    async fn apply(&self, issue: &mut Issue, step: Step) -> DomainResult<Transition> {
        let from = issue.stage;
        let origin = issue.pipeline_origin;

        let (trigger, to, last_outcome) = match step {
            Step::Hold => return Ok(Transition::hold(issue)),
            Step::Completed { trigger, report } => {
                let to = next_stage(from, origin, trigger, true)?;
                if let (Stage::Merged, LastOutcome::Merged { merge_sha }) = (to, &report) {
                    issue.outcome = Some(Outcome::Merged {
                        merge_sha: merge_sha.clone(),
                    });
                }
                (trigger, to, report)
            }
            Step::Failed {
                trigger,
                class,
                reason,
            } => {
                let budget = budget_key(from, origin, trigger);
                let available = budget.is_some_and(|stage| self.governor.try_consume(issue, stage));
                let to = next_stage(from, origin, trigger, available)?;
                let charged = budget.unwrap_or(from);

                if to == Stage::Failed {
                    let reason = format!("{charged} retry budget exhausted; last failure ({class}): {reason}");
                    tracing::warn!(issue_id = %issue.id, stage = %charged, %reason, "retry budget exhausted");
                    let outcome = Outcome::Failed {
                        class: FailureClass::RetryBudgetExhausted,
                        reason: reason.clone(),
                    };
                    issue.outcome = Some(outcome);
                    issue.diagnostic = Some(reason.clone());
                    (
                        trigger,
                        to,
                        LastOutcome::Failed {
                            class: FailureClass::RetryBudgetExhausted,
                            reason,
                        },
                    )
                } else {
                    tracing::info!(
                        issue_id = %issue.id,
                        stage = %charged,
                        attempt = issue.retry_count(charged),
                        max = self.governor.max_attempts(charged),
                        %class,
                        %reason,
                        "retrying stage"
                    );
                    (
                        trigger,
                        to,
                        LastOutcome::Retrying {
                            stage: charged,
                            class,
                            reason,
                        },
                    )
                }
            }
            Step::Unrecoverable { class, reason } => {
                let to = next_stage(from, origin, Trigger::Unrecoverable, false)?;
                tracing::error!(issue_id = %issue.id, stage = %from, %class, %reason, "workflow failed");
                issue.outcome = Some(Outcome::Failed {
                    class,
                    reason: reason.clone(),
                });
                issue.diagnostic = Some(reason.clone());
                (Trigger::Unrecoverable, to, LastOutcome::Failed { class, reason })
            }
            Step::Cancelled => {
                let to = next_stage(from, origin, Trigger::ExternalCancel, false)?;
                issue.outcome = Some(Outcome::Cancelled);
                (Trigger::ExternalCancel, to, LastOutcome::Cancelled)
            }
        };

        issue.pipeline_origin = match to {
            Stage::AwaitingPipeline if from == Stage::AwaitingPipeline => origin,
            Stage::AwaitingPipeline => Some(from),
            _ => None,
        };
        issue.stage = to;
        issue.last_outcome = Some(last_outcome.clone());
        issue.touch();

        match to {
            Stage::Merged | Stage::Failed => {
                self.monitor.untrack(&issue.id, true).await;
                self.cache.clear(&issue.id).await.map_err(cache_to_domain)?;
            }
            Stage::Cancelled => {
                self.monitor.untrack(&issue.id, true).await;
                self.cache.seal(&issue.id).await.map_err(cache_to_domain)?;
            }
            _ => {}
        }

        self.store.save(issue).await?;
        tracing::info!(
            issue_id = %issue.id,
            from = %from,
            to = %to,
            trigger = %trigger,
            "stage transition"
        );

        Ok(Transition {
            issue_id: issue.id.clone(),
            from,
            to,
            trigger: Some(trigger),
            outcome: Some(last_outcome),
        })
    }
}

/// Persist a fresh Planning record for `id`.
///
/// Fails with [`DomainError::AlreadyActive`] while a non-terminal workflow
/// exists. Used by the supervisor and by hosts that only enrol issues.
pub async fn enrol_issue(
    store: &dyn WorkflowStore,
    vcs: &VcsConfig,
    id: &IssueId,
) -> DomainResult<Issue> {
    if let Some(existing) = store.load(id).await? {
        if !existing.is_terminal() {
            return Err(DomainError::AlreadyActive(id.clone()));
        }
    }

    let issue = Issue::new(id.clone(), vcs.work_branch(id.as_str()));
    store.save(&issue).await?;
    tracing::info!(issue_id = %id, run_id = %issue.run_id, branch = %issue.work_branch, "workflow started");
    Ok(issue)
}

fn cache_to_domain(err: CacheError) -> DomainError {
    match err {
        CacheError::Store(err) => err,
        other => DomainError::ValidationFailed(other.to_string()),
    }
}

/// A miss or malformed hand-off aborts the workflow; store faults propagate.
fn cache_failure(err: CacheError) -> DomainResult<Step> {
    match err {
        CacheError::Store(err) => Err(err),
        other => Ok(Step::configuration(other.to_string())),
    }
}

fn monitor_failure(err: MonitorError) -> Step {
    match err {
        MonitorError::TransientInfra(err) => Step::Failed {
            trigger: Trigger::Retryable,
            class: FailureClass::TransientInfra,
            reason: err.to_string(),
        },
        MonitorError::Backend(err) => Step::configuration(err.to_string()),
    }
}

fn describe_failure(
    pipeline_id: &PipelineId,
    class: FailureClass,
    failed_jobs: &[crate::domain::models::JobFailure],
) -> String {
    match class {
        FailureClass::TimedOut => format!("pipeline {pipeline_id} timed out"),
        _ if failed_jobs.is_empty() => format!("pipeline {pipeline_id} did not succeed"),
        _ => {
            let names: Vec<&str> = failed_jobs.iter().map(|job| job.name.as_str()).collect();
            format!("pipeline {pipeline_id} failed: {}", names.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::mock::{AgentScript, MockAgentRuntime, MockCiBackend, MockVcs, PipelineScript};

    struct Harness {
        supervisor: WorkflowSupervisor,
        ci: Arc<MockCiBackend>,
        agent: Arc<MockAgentRuntime>,
        vcs: Arc<MockVcs>,
    }

    fn harness() -> Harness {
        let ci = Arc::new(MockCiBackend::new());
        let agent = Arc::new(MockAgentRuntime::new());
        let vcs = Arc::new(MockVcs::new());
        let store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.pipeline.initial_poll_secs = 1;
        config.pipeline.max_poll_secs = 4;

        let supervisor = WorkflowSupervisor::new(
            config,
            Backends {
                ci: ci.clone(),
                vcs: vcs.clone(),
                agent: agent.clone(),
                store: store.clone(),
                handoffs: Some(store),
            },
        );
        Harness {
            supervisor,
            ci,
            agent,
            vcs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_merges() {
        let h = harness();
        let id = IssueId::new("I1");
        h.supervisor.start_workflow(&id).await.unwrap();

        let status = h.supervisor.run_workflow(&id).await.unwrap();
        assert_eq!(status.stage, Stage::Merged);
        assert!(status.retry_counts.values().all(|count| *count == 0));
        assert_eq!(
            status.outcome,
            Some(Outcome::Merged {
                merge_sha: Some("m1".to_string())
            })
        );
        assert_eq!(h.vcs.merges().len(), 1);
        assert_eq!(h.ci.triggered().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coding_sees_plan_and_failure_feedback() {
        let h = harness();
        h.ci.script(
            "c1",
            PipelineScript::fail_after(0, vec![("unit", "thread panicked")]),
        );
        let id = IssueId::new("I1");
        h.supervisor.start_workflow(&id).await.unwrap();

        h.supervisor.run_workflow(&id).await.unwrap();
        let retried = h
            .agent
            .invocations()
            .into_iter()
            .find(|inv| inv.stage == Stage::Coding && inv.attempt == 1)
            .unwrap();
        assert_eq!(retried.context_kinds, vec!["plan", "ci_failure"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let h = harness();
        let id = IssueId::new("I1");
        h.supervisor.start_workflow(&id).await.unwrap();
        let err = h.supervisor.start_workflow(&id).await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyActive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_unknown_issue() {
        let h = harness();
        let err = h.supervisor.advance(&IssueId::new("nope")).await.unwrap_err();
        assert!(matches!(err, DomainError::IssueNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_agent_fails_without_budget() {
        let h = harness();
        h.agent.always(
            Stage::Planning,
            AgentScript::error(crate::domain::ports::AgentError::Configuration(
                "no credentials".to_string(),
            )),
        );
        let id = IssueId::new("I1");
        h.supervisor.start_workflow(&id).await.unwrap();

        let transition = h.supervisor.advance(&id).await.unwrap();
        assert_eq!(transition.to, Stage::Failed);
        let status = h.supervisor.get_status(&id).await.unwrap();
        assert_eq!(status.retry_counts.get(&Stage::Planning).copied().unwrap_or(0), 0);
        assert!(matches!(
            status.outcome,
            Some(Outcome::Failed {
                class: FailureClass::Configuration,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_consumes_review_budget() {
        let h = harness();
        h.agent.script(
            Stage::Reviewing,
            0,
            AgentScript::review(ReviewDecision::Reject),
        );
        let id = IssueId::new("I1");
        h.supervisor.start_workflow(&id).await.unwrap();

        let status = h.supervisor.run_workflow(&id).await.unwrap();
        assert_eq!(status.stage, Stage::Merged);
        assert_eq!(status.retry_counts.get(&Stage::Reviewing), Some(&1));

        let coding_after_review = h
            .agent
            .invocations()
            .into_iter()
            .filter(|inv| inv.stage == Stage::Coding)
            .last()
            .unwrap();
        assert!(coding_after_review.context_kinds.contains(&"review"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_failure_retries_review() {
        let h = harness();
        h.vcs.fail_merges(true);
        let id = IssueId::new("I1");
        h.supervisor.start_workflow(&id).await.unwrap();

        let status = h.supervisor.run_workflow(&id).await.unwrap();
        assert_eq!(status.stage, Stage::Failed);
        assert_eq!(status.retry_counts.get(&Stage::Reviewing), Some(&3));
        assert!(matches!(
            status.outcome,
            Some(Outcome::Failed {
                class: FailureClass::RetryBudgetExhausted,
                ..
            })
        ));
    }

    #[test]
    fn test_describe_failure_names_jobs() {
        let jobs = vec![crate::domain::models::JobFailure {
            job_id: "j1".to_string(),
            name: "unit".to_string(),
            trace_excerpt: String::new(),
        }];
        let reason = describe_failure(&PipelineId::new("p2"), FailureClass::StageFailure, &jobs);
        assert_eq!(reason, "pipeline p2 failed: unit");
        assert_eq!(
            describe_failure(&PipelineId::new("p2"), FailureClass::TimedOut, &[]),
            "pipeline p2 timed out"
        );
    }
}
