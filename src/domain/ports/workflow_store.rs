use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Issue, IssueId, Stage, StageOutput};

/// Repository port for per-issue workflow records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Get an issue by ID
    async fn load(&self, id: &IssueId) -> DomainResult<Option<Issue>>;

    /// Insert or replace an issue record
    async fn save(&self, issue: &Issue) -> DomainResult<()>;

    /// Issues that have not reached a terminal stage
    async fn list_active(&self) -> DomainResult<Vec<Issue>>;

    /// Every issue, newest first
    async fn list_all(&self) -> DomainResult<Vec<Issue>>;
}

/// Repository port for persisted hand-off entries.
///
/// Entries are grouped by the stage slot that will consume them and kept in
/// insertion order.
#[async_trait]
pub trait HandoffStore: Send + Sync {
    /// Append an entry to a stage slot
    async fn append(&self, issue: &IssueId, stage: Stage, output: &StageOutput)
        -> DomainResult<()>;

    /// Live (unsealed) entries for one slot
    async fn load_live(&self, issue: &IssueId, stage: Stage) -> DomainResult<Vec<StageOutput>>;

    /// Drop every live entry in the given slots
    async fn remove_stages(&self, issue: &IssueId, stages: &[Stage]) -> DomainResult<()>;

    /// Drop every live entry for the issue
    async fn clear(&self, issue: &IssueId) -> DomainResult<()>;

    /// Mark every live entry as sealed; sealed entries are read-only
    async fn seal(&self, issue: &IssueId) -> DomainResult<()>;

    /// Sealed entries, for post-mortem inspection
    async fn load_sealed(&self, issue: &IssueId) -> DomainResult<Vec<(Stage, StageOutput)>>;
}
