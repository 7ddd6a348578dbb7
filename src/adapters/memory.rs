//! In-memory workflow and hand-off stores.
//!
//! Used by tests and by callers that do not need durability. Cloning the
//! store shares the underlying maps, so a "restarted" supervisor can be
//! handed the same state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Issue, IssueId, Stage, StageOutput};
use crate::domain::ports::{HandoffStore, WorkflowStore};

#[derive(Debug, Clone)]
struct StoredHandoff {
    stage: Stage,
    output: StageOutput,
    sealed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    issues: Arc<RwLock<HashMap<IssueId, Issue>>>,
    handoffs: Arc<RwLock<HashMap<IssueId, Vec<StoredHandoff>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load(&self, id: &IssueId) -> DomainResult<Option<Issue>> {
        Ok(self.issues.read().await.get(id).cloned())
    }

    async fn save(&self, issue: &Issue) -> DomainResult<()> {
        self.issues
            .write()
            .await
            .insert(issue.id.clone(), issue.clone());
        Ok(())
    }

    async fn list_active(&self) -> DomainResult<Vec<Issue>> {
        let issues = self.issues.read().await;
        let mut active: Vec<Issue> = issues
            .values()
            .filter(|issue| !issue.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn list_all(&self) -> DomainResult<Vec<Issue>> {
        let issues = self.issues.read().await;
        let mut all: Vec<Issue> = issues.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}

#[async_trait]
impl HandoffStore for MemoryStore {
    async fn append(
        &self,
        issue: &IssueId,
        stage: Stage,
        output: &StageOutput,
    ) -> DomainResult<()> {
        self.handoffs
            .write()
            .await
            .entry(issue.clone())
            .or_default()
            .push(StoredHandoff {
                stage,
                output: output.clone(),
                sealed: false,
            });
        Ok(())
    }

    async fn load_live(&self, issue: &IssueId, stage: Stage) -> DomainResult<Vec<StageOutput>> {
        let handoffs = self.handoffs.read().await;
        Ok(handoffs
            .get(issue)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| !entry.sealed && entry.stage == stage)
                    .map(|entry| entry.output.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_stages(&self, issue: &IssueId, stages: &[Stage]) -> DomainResult<()> {
        if let Some(entries) = self.handoffs.write().await.get_mut(issue) {
            entries.retain(|entry| entry.sealed || !stages.contains(&entry.stage));
        }
        Ok(())
    }

    async fn clear(&self, issue: &IssueId) -> DomainResult<()> {
        if let Some(entries) = self.handoffs.write().await.get_mut(issue) {
            entries.retain(|entry| entry.sealed);
        }
        Ok(())
    }

    async fn seal(&self, issue: &IssueId) -> DomainResult<()> {
        if let Some(entries) = self.handoffs.write().await.get_mut(issue) {
            for entry in entries.iter_mut() {
                entry.sealed = true;
            }
        }
        Ok(())
    }

    async fn load_sealed(&self, issue: &IssueId) -> DomainResult<Vec<(Stage, StageOutput)>> {
        let handoffs = self.handoffs.read().await;
        Ok(handoffs
            .get(issue)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.sealed)
                    .map(|entry| (entry.stage, entry.output.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
