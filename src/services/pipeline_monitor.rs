//! Pipeline tracking, polling and staleness detection.
//!
//! The monitor tracks at most one pipeline run per issue: the run for the
//! issue's latest commit. Submitting a newer commit cancels the previous
//! run's waiters and, best-effort, the run itself on the backend. Status
//! events and poll results for runs that are no longer tracked are
//! discarded, so a stale pipeline can never advance an issue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::domain::models::{
    IssueId, JobFailure, PipelineConfig, PipelineEvent, PipelineId, PipelineOutcome, PipelineRun,
    PipelineSnapshot, PipelineStatus,
};
use crate::domain::ports::{CiBackend, CiError};

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Backend stayed unreachable past the client's retries
    #[error("CI backend unavailable: {0}")]
    TransientInfra(CiError),

    #[error("CI backend error: {0}")]
    Backend(CiError),
}

impl From<CiError> for MonitorError {
    fn from(err: CiError) -> Self {
        match err {
            CiError::TransientInfra { .. } | CiError::Transient(_) => Self::TransientInfra(err),
            other => Self::Backend(other),
        }
    }
}

/// What the monitor did with a delivered status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Accepted,
    /// The event named a run that is not the issue's tracked run
    Discarded,
}

struct TrackedRun {
    run: PipelineRun,
    token: CancellationToken,
    wake: Arc<Notify>,
    /// Terminal status pushed by an event, not yet consumed by a waiter
    observed: Option<PipelineStatus>,
}

impl TrackedRun {
    fn new(run: PipelineRun) -> Self {
        Self {
            run,
            token: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
            observed: None,
        }
    }
}

/// One issue's slot in the run table.
#[derive(Default)]
struct IssueRuns {
    tracked: Option<TrackedRun>,
    /// Bumped by every submit, restore and untrack. A trigger that returns
    /// after the generation moved on lost to a newer claim.
    generation: u64,
}

type Slot = Arc<Mutex<IssueRuns>>;

pub struct PipelineMonitor {
    backend: Arc<dyn CiBackend>,
    config: PipelineConfig,
    /// Only guards slot lookup; each issue's runs sit behind their own lock.
    issues: Mutex<HashMap<IssueId, Slot>>,
}

fn lock(slot: &Mutex<IssueRuns>) -> MutexGuard<'_, IssueRuns> {
    // A panic while holding the lock cannot leave a slot half-updated.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PipelineMonitor {
    pub fn new(backend: Arc<dyn CiBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            issues: Mutex::new(HashMap::new()),
        }
    }

    fn issues(&self) -> MutexGuard<'_, HashMap<IssueId, Slot>> {
        self.issues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_runs<R>(&self, issue: &IssueId, f: impl FnOnce(&mut IssueRuns) -> R) -> R {
        let slot = self.issues().entry(issue.clone()).or_default().clone();
        let mut runs = lock(&slot);
        f(&mut runs)
    }

    /// Like [`Self::with_runs`], without creating a slot for unknown issues.
    fn with_existing<R>(&self, issue: &IssueId, f: impl FnOnce(&mut IssueRuns) -> R) -> Option<R> {
        let slot = self.issues().get(issue).cloned()?;
        let mut runs = lock(&slot);
        Some(f(&mut runs))
    }

    /// Start tracking the pipeline for `commit_sha`, replacing any older run.
    ///
    /// The latest submit for an issue always wins, whatever order the backend
    /// answers in. A submit overtaken while its trigger was in flight cancels
    /// the run it started and returns it as `canceled`, untracked.
    ///
    /// Submitting the commit that is already tracked returns the tracked run
    /// without triggering a new one.
    #[instrument(skip_all, fields(issue_id = %issue, commit_sha = %commit_sha))]
    pub async fn submit(
        &self,
        issue: &IssueId,
        branch: &str,
        commit_sha: &str,
    ) -> Result<PipelineRun, MonitorError> {
        let claim = self.with_runs(issue, |runs| {
            if let Some(tracked) = &runs.tracked {
                if tracked.run.commit_sha == commit_sha {
                    return Err(tracked.run.clone());
                }
            }
            runs.generation += 1;
            Ok((runs.generation, runs.tracked.take()))
        });
        let (generation, previous) = match claim {
            Ok(claim) => claim,
            Err(tracked) => return Ok(tracked),
        };

        if let Some(previous) = previous {
            self.retire(issue, previous).await;
        }

        let snapshot = self.backend.trigger_pipeline(branch, commit_sha).await?;
        let mut run = PipelineRun::new(snapshot.id, commit_sha, snapshot.status);

        let tracked = self.with_runs(issue, |runs| {
            if runs.generation != generation {
                return false;
            }
            runs.tracked = Some(TrackedRun::new(run.clone()));
            true
        });
        if !tracked {
            tracing::info!(
                issue_id = %issue,
                pipeline_id = %run.id,
                commit_sha,
                "pipeline overtaken by a newer submit before it was tracked"
            );
            if !run.status.is_terminal() {
                self.cancel_quietly(issue, &run.id).await;
                run.status = PipelineStatus::Canceled;
            }
            return Ok(run);
        }

        tracing::info!(
            issue_id = %issue,
            pipeline_id = %run.id,
            commit_sha,
            "pipeline submitted"
        );
        Ok(run)
    }

    /// Track a run persisted before a restart without triggering anything.
    pub fn restore(&self, issue: &IssueId, run: PipelineRun) {
        self.with_runs(issue, |runs| {
            if runs.tracked.as_ref().is_some_and(|tracked| tracked.run.id == run.id) {
                return;
            }
            runs.generation += 1;
            if let Some(old) = runs.tracked.replace(TrackedRun::new(run)) {
                old.token.cancel();
            }
        });
    }

    /// The run currently tracked for the issue.
    pub fn tracked(&self, issue: &IssueId) -> Option<PipelineRun> {
        self.with_existing(issue, |runs| runs.tracked.as_ref().map(|tracked| tracked.run.clone()))
            .flatten()
    }

    /// Stop tracking the issue's run, optionally canceling it on the backend.
    ///
    /// A submit still waiting on the backend loses its claim as well.
    pub async fn untrack(&self, issue: &IssueId, cancel_backend: bool) {
        let removed = self
            .with_existing(issue, |runs| {
                runs.generation += 1;
                runs.tracked.take()
            })
            .flatten();
        if let Some(tracked) = removed {
            tracked.token.cancel();
            if cancel_backend && !tracked.run.status.is_terminal() {
                self.cancel_quietly(issue, &tracked.run.id).await;
            }
        }
    }

    /// Deliver a pushed status event.
    pub fn observe(&self, event: &PipelineEvent) -> EventDisposition {
        let accepted = self
            .with_existing(&event.issue_id, |runs| {
                let Some(tracked) = runs
                    .tracked
                    .as_mut()
                    .filter(|tracked| tracked.run.id == event.pipeline_id)
                else {
                    return false;
                };
                tracked.run.status = event.status;
                if event.status.is_terminal() {
                    tracked.observed = Some(event.status);
                }
                tracked.wake.notify_one();
                true
            })
            .unwrap_or(false);

        if accepted {
            return EventDisposition::Accepted;
        }
        tracing::info!(
            issue_id = %event.issue_id,
            pipeline_id = %event.pipeline_id,
            status = %event.status,
            "discarding status event for untracked pipeline"
        );
        EventDisposition::Discarded
    }

    /// Wait for the tracked run `pipeline_id` to finish, or for `timeout`.
    ///
    /// The ceiling holds even while a backend poll is outstanding. Returns
    /// [`PipelineOutcome::Superseded`] as soon as the run stops being the
    /// issue's tracked run.
    #[instrument(skip_all, fields(issue_id = %issue, pipeline_id = %pipeline_id))]
    pub async fn await_outcome(
        &self,
        issue: &IssueId,
        pipeline_id: &PipelineId,
        timeout: Duration,
    ) -> Result<PipelineOutcome, MonitorError> {
        let Some((token, wake)) = self.handles(issue, pipeline_id) else {
            return Ok(PipelineOutcome::Superseded);
        };

        let deadline = Instant::now() + timeout;
        let mut interval = self.config.initial_poll();

        loop {
            let status = match self.take_observed(issue, pipeline_id) {
                Some(status) => status,
                None => {
                    let snapshot = tokio::select! {
                        _ = token.cancelled() => return Ok(PipelineOutcome::Superseded),
                        () = tokio::time::sleep_until(deadline) => {
                            return Ok(self.time_out(issue, pipeline_id, timeout).await);
                        }
                        snapshot = self.backend.get_pipeline(pipeline_id) => snapshot?,
                    };
                    if !self.record_poll(issue, &snapshot) {
                        return Ok(PipelineOutcome::Superseded);
                    }
                    snapshot.status
                }
            };

            if status.is_terminal() {
                return self.classify(issue, pipeline_id, status).await;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(self.time_out(issue, pipeline_id, timeout).await);
            }

            let sleep_for = interval.min(deadline - now);
            tokio::select! {
                _ = token.cancelled() => return Ok(PipelineOutcome::Superseded),
                _ = wake.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
            interval = self.next_interval(interval);
        }
    }

    fn handles(
        &self,
        issue: &IssueId,
        pipeline_id: &PipelineId,
    ) -> Option<(CancellationToken, Arc<Notify>)> {
        self.with_existing(issue, |runs| {
            runs.tracked
                .as_ref()
                .filter(|tracked| &tracked.run.id == pipeline_id)
                .map(|tracked| (tracked.token.clone(), tracked.wake.clone()))
        })
        .flatten()
    }

    fn take_observed(&self, issue: &IssueId, pipeline_id: &PipelineId) -> Option<PipelineStatus> {
        self.with_existing(issue, |runs| {
            runs.tracked
                .as_mut()
                .filter(|tracked| &tracked.run.id == pipeline_id)
                .and_then(|tracked| tracked.observed.take())
        })
        .flatten()
    }

    /// Store a polled status; `false` if the run is no longer tracked.
    fn record_poll(&self, issue: &IssueId, snapshot: &PipelineSnapshot) -> bool {
        let recorded = self
            .with_existing(issue, |runs| {
                match runs
                    .tracked
                    .as_mut()
                    .filter(|tracked| tracked.run.id == snapshot.id)
                {
                    Some(tracked) => {
                        tracked.run.status = snapshot.status;
                        true
                    }
                    None => false,
                }
            })
            .unwrap_or(false);

        if !recorded {
            tracing::info!(
                issue_id = %issue,
                pipeline_id = %snapshot.id,
                "discarding poll result for untracked pipeline"
            );
        }
        recorded
    }

    fn mark_status(&self, issue: &IssueId, pipeline_id: &PipelineId, status: PipelineStatus) {
        self.with_existing(issue, |runs| {
            if let Some(tracked) = runs
                .tracked
                .as_mut()
                .filter(|tracked| &tracked.run.id == pipeline_id)
            {
                tracked.run.status = status;
            }
        });
    }

    async fn time_out(
        &self,
        issue: &IssueId,
        pipeline_id: &PipelineId,
        timeout: Duration,
    ) -> PipelineOutcome {
        tracing::warn!(
            issue_id = %issue,
            pipeline_id = %pipeline_id,
            timeout_secs = timeout.as_secs(),
            "pipeline timed out"
        );
        self.cancel_quietly(issue, pipeline_id).await;
        self.mark_status(issue, pipeline_id, PipelineStatus::Canceled);
        PipelineOutcome::TimedOut
    }

    fn next_interval(&self, current: Duration) -> Duration {
        let multiplier = self.config.backoff_multiplier.max(1.0);
        current.mul_f64(multiplier).min(self.config.max_poll())
    }

    async fn classify(
        &self,
        issue: &IssueId,
        pipeline_id: &PipelineId,
        status: PipelineStatus,
    ) -> Result<PipelineOutcome, MonitorError> {
        let outcome = match status {
            PipelineStatus::Success => PipelineOutcome::Succeeded,
            PipelineStatus::Canceled => PipelineOutcome::Canceled,
            _ => PipelineOutcome::Failed {
                failed_jobs: self.failed_jobs(pipeline_id).await?,
            },
        };
        tracing::info!(
            issue_id = %issue,
            pipeline_id = %pipeline_id,
            %status,
            "pipeline finished"
        );
        Ok(outcome)
    }

    /// Failed jobs of a run with the tail of each job's trace.
    async fn failed_jobs(&self, pipeline_id: &PipelineId) -> Result<Vec<JobFailure>, MonitorError> {
        let snapshot = self.backend.get_pipeline(pipeline_id).await?;
        let mut failures = Vec::new();
        for job in snapshot
            .jobs
            .into_iter()
            .filter(|job| job.status == PipelineStatus::Failed)
        {
            let trace_excerpt = match self.backend.get_job_trace(&job.id).await {
                Ok(trace) => tail_lines(&trace, self.config.trace_tail_lines),
                Err(err) => {
                    tracing::warn!(job_id = %job.id, error = %err, "failed to fetch job trace");
                    String::new()
                }
            };
            failures.push(JobFailure {
                job_id: job.id,
                name: job.name,
                trace_excerpt,
            });
        }
        Ok(failures)
    }

    async fn retire(&self, issue: &IssueId, previous: TrackedRun) {
        previous.token.cancel();
        tracing::info!(
            issue_id = %issue,
            pipeline_id = %previous.run.id,
            "pipeline superseded by newer commit"
        );
        if !previous.run.status.is_terminal() {
            self.cancel_quietly(issue, &previous.run.id).await;
        }
    }

    async fn cancel_quietly(&self, issue: &IssueId, pipeline_id: &PipelineId) {
        if let Err(err) = self.backend.cancel_pipeline(pipeline_id).await {
            tracing::warn!(
                issue_id = %issue,
                pipeline_id = %pipeline_id,
                error = %err,
                "failed to cancel pipeline"
            );
        }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
