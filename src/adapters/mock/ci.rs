//! Mock CI backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::models::{PipelineId, PipelineJob, PipelineSnapshot, PipelineStatus};
use crate::domain::ports::{CiBackend, CiError};

/// How a pipeline for a given commit behaves.
#[derive(Debug, Clone)]
pub struct PipelineScript {
    /// Polls answered with `running` before the terminal status
    pub polls_until_terminal: Option<u32>,
    /// Status reported once terminal
    pub terminal: PipelineStatus,
    /// Failed jobs as (name, trace)
    pub failed_jobs: Vec<(String, String)>,
}

impl Default for PipelineScript {
    fn default() -> Self {
        Self::succeed_after(1)
    }
}

impl PipelineScript {
    pub fn succeed_after(polls: u32) -> Self {
        Self {
            polls_until_terminal: Some(polls),
            terminal: PipelineStatus::Success,
            failed_jobs: Vec::new(),
        }
    }

    pub fn fail_after(polls: u32, jobs: Vec<(&str, &str)>) -> Self {
        Self {
            polls_until_terminal: Some(polls),
            terminal: PipelineStatus::Failed,
            failed_jobs: jobs
                .into_iter()
                .map(|(name, trace)| (name.to_string(), trace.to_string()))
                .collect(),
        }
    }

    pub fn never_finishes() -> Self {
        Self {
            polls_until_terminal: None,
            terminal: PipelineStatus::Running,
            failed_jobs: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct MockPipeline {
    id: PipelineId,
    script: PipelineScript,
    polls: u32,
    cancelled: bool,
}

impl MockPipeline {
    fn status(&self) -> PipelineStatus {
        if self.cancelled {
            return PipelineStatus::Canceled;
        }
        match self.script.polls_until_terminal {
            Some(limit) if self.polls > limit => self.script.terminal,
            Some(_) | None if self.polls == 0 => PipelineStatus::Pending,
            _ => PipelineStatus::Running,
        }
    }

    fn snapshot(&self) -> PipelineSnapshot {
        let status = self.status();
        let mut jobs = vec![PipelineJob {
            id: format!("{}-build", self.id),
            name: "build".to_string(),
            status: if status == PipelineStatus::Failed {
                PipelineStatus::Success
            } else {
                status
            },
        }];
        if status == PipelineStatus::Failed {
            jobs.extend(
                self.script
                    .failed_jobs
                    .iter()
                    .enumerate()
                    .map(|(index, (name, _))| PipelineJob {
                        id: format!("{}-job{}", self.id, index),
                        name: name.clone(),
                        status: PipelineStatus::Failed,
                    }),
            );
        }
        PipelineSnapshot {
            id: self.id.clone(),
            status,
            jobs,
        }
    }
}

#[derive(Debug, Default)]
struct MockCiState {
    next_id: u32,
    scripts: HashMap<String, PipelineScript>,
    pipelines: HashMap<PipelineId, MockPipeline>,
    triggered: Vec<(String, String, PipelineId)>,
    cancelled: Vec<PipelineId>,
    failures_remaining: u32,
    trigger_delays: HashMap<String, Duration>,
}

/// In-memory CI backend with scripted pipeline behaviour per commit.
///
/// Pipeline ids are assigned sequentially (`p1`, `p2`, ...). A pipeline
/// reports `pending` until its first poll, then `running`, then its
/// scripted terminal status.
#[derive(Debug, Default)]
pub struct MockCiBackend {
    state: Mutex<MockCiState>,
}

impl MockCiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockCiState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script the pipeline that will run for `commit_sha`.
    pub fn script(&self, commit_sha: &str, script: PipelineScript) {
        self.state().scripts.insert(commit_sha.to_string(), script);
    }

    /// Hold every trigger for `commit_sha` for `delay` before answering.
    pub fn delay_trigger(&self, commit_sha: &str, delay: Duration) {
        self.state()
            .trigger_delays
            .insert(commit_sha.to_string(), delay);
    }

    /// Make the next `count` calls fail with a transient error.
    pub fn fail_next_calls(&self, count: u32) {
        self.state().failures_remaining = count;
    }

    /// Triggered pipelines as (branch, commit, id).
    pub fn triggered(&self) -> Vec<(String, String, PipelineId)> {
        self.state().triggered.clone()
    }

    pub fn cancelled(&self) -> Vec<PipelineId> {
        self.state().cancelled.clone()
    }

    pub fn status_of(&self, id: &PipelineId) -> Option<PipelineStatus> {
        self.state().pipelines.get(id).map(MockPipeline::status)
    }

    fn injected_failure(state: &mut MockCiState) -> Result<(), CiError> {
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CiError::Transient("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CiBackend for MockCiBackend {
    async fn trigger_pipeline(
        &self,
        branch: &str,
        commit_sha: &str,
    ) -> Result<PipelineSnapshot, CiError> {
        let delay = self.state().trigger_delays.get(commit_sha).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        Self::injected_failure(&mut state)?;

        state.next_id += 1;
        let id = PipelineId::new(format!("p{}", state.next_id));
        let script = state.scripts.get(commit_sha).cloned().unwrap_or_default();
        let pipeline = MockPipeline {
            id: id.clone(),
            script,
            polls: 0,
            cancelled: false,
        };
        let snapshot = pipeline.snapshot();
        state.pipelines.insert(id.clone(), pipeline);
        state
            .triggered
            .push((branch.to_string(), commit_sha.to_string(), id));
        Ok(snapshot)
    }

    async fn get_pipeline(&self, id: &PipelineId) -> Result<PipelineSnapshot, CiError> {
        let mut state = self.state();
        Self::injected_failure(&mut state)?;

        let pipeline = state
            .pipelines
            .get_mut(id)
            .ok_or_else(|| CiError::NotFound(id.clone()))?;
        pipeline.polls += 1;
        Ok(pipeline.snapshot())
    }

    async fn get_job_trace(&self, job_id: &str) -> Result<String, CiError> {
        let mut state = self.state();
        Self::injected_failure(&mut state)?;

        state
            .pipelines
            .values()
            .find_map(|pipeline| {
                let (_, index) = job_id.rsplit_once("-job")?;
                if !job_id.starts_with(&format!("{}-", pipeline.id)) {
                    return None;
                }
                let index: usize = index.parse().ok()?;
                pipeline
                    .script
                    .failed_jobs
                    .get(index)
                    .map(|(_, trace)| trace.clone())
            })
            .ok_or_else(|| CiError::Rejected(format!("unknown job {job_id}")))
    }

    async fn cancel_pipeline(&self, id: &PipelineId) -> Result<(), CiError> {
        let mut state = self.state();
        Self::injected_failure(&mut state)?;

        let pipeline = state
            .pipelines
            .get_mut(id)
            .ok_or_else(|| CiError::NotFound(id.clone()))?;
        if !pipeline.status().is_terminal() {
            pipeline.cancelled = true;
        }
        state.cancelled.push(id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failure_exposes_job_traces() {
        let ci = MockCiBackend::new();
        ci.script("c1", PipelineScript::fail_after(0, vec![("lint", "bad style")]));

        let snapshot = ci.trigger_pipeline("b", "c1").await.unwrap();
        assert_eq!(snapshot.status, PipelineStatus::Pending);

        let polled = ci.get_pipeline(&snapshot.id).await.unwrap();
        assert_eq!(polled.status, PipelineStatus::Failed);
        let failed = polled
            .jobs
            .iter()
            .find(|job| job.status == PipelineStatus::Failed)
            .unwrap();
        assert_eq!(ci.get_job_trace(&failed.id).await.unwrap(), "bad style");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_trigger_assigns_id_on_answer() {
        let ci = MockCiBackend::new();
        ci.delay_trigger("c1", Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let (slow, fast) = tokio::join!(ci.trigger_pipeline("b", "c1"), ci.trigger_pipeline("b", "c2"));
        assert_eq!(fast.unwrap().id, PipelineId::new("p1"));
        assert_eq!(slow.unwrap().id, PipelineId::new("p2"));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_marks_running_pipeline() {
        let ci = MockCiBackend::new();
        ci.script("c1", PipelineScript::never_finishes());
        let snapshot = ci.trigger_pipeline("b", "c1").await.unwrap();

        ci.cancel_pipeline(&snapshot.id).await.unwrap();
        assert_eq!(ci.status_of(&snapshot.id), Some(PipelineStatus::Canceled));
    }
}
