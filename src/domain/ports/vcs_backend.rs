use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the version-control backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VcsError {
    #[error("Transient VCS error: {0}")]
    Transient(String),

    #[error("Merge conflict: {0}")]
    Conflict(String),

    #[error("VCS request rejected: {0}")]
    Rejected(String),
}

/// Port for the branch operations agents and the supervisor perform.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Write `content` to `path` on `branch` as one commit; returns the new head SHA.
    async fn create_or_update_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, VcsError>;

    /// Merge `source` into `target`; returns the merge commit SHA.
    async fn merge_branch(&self, source: &str, target: &str) -> Result<String, VcsError>;
}
