//! CI backend port - interface for pipeline providers.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::{PipelineId, PipelineSnapshot};

/// Errors reported by a CI backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CiError {
    /// Network error, rate limit, 5xx; worth retrying
    #[error("Transient CI error: {0}")]
    Transient(String),

    #[error("Pipeline not found: {0}")]
    NotFound(PipelineId),

    /// Credentials, permissions or a malformed request
    #[error("CI request rejected: {0}")]
    Rejected(String),

    /// Transient errors persisted past the client's retry budget
    #[error("CI backend unavailable after {attempts} attempts: {message}")]
    TransientInfra { attempts: u32, message: String },
}

impl CiError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Port for triggering, querying and canceling pipelines.
#[async_trait]
pub trait CiBackend: Send + Sync {
    /// Start a pipeline for `commit_sha` on `branch`.
    async fn trigger_pipeline(
        &self,
        branch: &str,
        commit_sha: &str,
    ) -> Result<PipelineSnapshot, CiError>;

    /// Current status and jobs of a pipeline.
    async fn get_pipeline(&self, id: &PipelineId) -> Result<PipelineSnapshot, CiError>;

    /// Full trace output of one job.
    async fn get_job_trace(&self, job_id: &str) -> Result<String, CiError>;

    /// Cancel a pipeline. Canceling a finished pipeline is not an error.
    async fn cancel_pipeline(&self, id: &PipelineId) -> Result<(), CiError>;
}
