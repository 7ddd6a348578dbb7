//! Per-issue hand-off cache.
//!
//! Stage outputs are stored in the slot of the stage that will consume them.
//! Entries are written through to an optional [`HandoffStore`] and hydrated
//! lazily, so a restarted process sees the same context it had before.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::errors::DomainError;
use crate::domain::models::{HandoffContext, IssueId, Stage, StageOutput};
use crate::domain::ports::HandoffStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("No hand-off context for {issue} in {stage}")]
    Miss { issue: IssueId, stage: Stage },

    #[error("Hand-off context for {issue} in {stage} is missing its {expected} entry")]
    Malformed {
        issue: IssueId,
        stage: Stage,
        expected: &'static str,
    },

    #[error(transparent)]
    Store(#[from] DomainError),
}

#[derive(Debug, Default)]
struct IssueEntries {
    slots: BTreeMap<Stage, Vec<StageOutput>>,
    /// Slots already read from the store
    hydrated: Vec<Stage>,
    sealed: bool,
}

type Entries = Arc<RwLock<IssueEntries>>;

#[derive(Default)]
pub struct ContextCache {
    /// Only guards lookup; each issue's slots sit behind their own lock.
    issues: Mutex<HashMap<IssueId, Entries>>,
    store: Option<Arc<dyn HandoffStore>>,
}

impl ContextCache {
    /// In-memory cache with no durable backing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn HandoffStore>) -> Self {
        Self {
            issues: Mutex::new(HashMap::new()),
            store: Some(store),
        }
    }

    fn entries(&self, issue: &IssueId) -> Entries {
        self.issues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(issue.clone())
            .or_default()
            .clone()
    }

    /// Append `output` to the slot `stage` will read.
    pub async fn put(
        &self,
        issue: &IssueId,
        stage: Stage,
        output: StageOutput,
    ) -> Result<(), CacheError> {
        let entries = self.entries(issue);
        self.hydrate(issue, &entries, stage).await?;
        if let Some(store) = &self.store {
            store.append(issue, stage, &output).await?;
        }

        entries
            .write()
            .await
            .slots
            .entry(stage)
            .or_default()
            .push(output);
        tracing::debug!(issue_id = %issue, %stage, "hand-off stored");
        Ok(())
    }

    /// Read the context for `stage`; an empty slot is a miss.
    pub async fn get(&self, issue: &IssueId, stage: Stage) -> Result<HandoffContext, CacheError> {
        let entries = self.entries(issue);
        self.hydrate(issue, &entries, stage).await?;

        let entries = entries.read().await;
        let slot = Some(&*entries)
            .filter(|e| !e.sealed)
            .and_then(|e| e.slots.get(&stage))
            .filter(|slot| !slot.is_empty())
            .ok_or_else(|| CacheError::Miss {
                issue: issue.clone(),
                stage,
            })?;

        let context = HandoffContext::new(stage, slot.clone());
        if !context.is_well_formed() {
            return Err(CacheError::Malformed {
                issue: issue.clone(),
                stage,
                expected: HandoffContext::required_kind(stage).unwrap_or("any"),
            });
        }
        Ok(context)
    }

    /// Drop the given slots, both cached and persisted.
    pub async fn invalidate(&self, issue: &IssueId, stages: &[Stage]) -> Result<(), CacheError> {
        if stages.is_empty() {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.remove_stages(issue, stages).await?;
        }

        let entries = self.entries(issue);
        let mut issue_entries = entries.write().await;
        for stage in stages {
            issue_entries.slots.remove(stage);
            // The store is empty for these slots now, nothing left to hydrate.
            if !issue_entries.hydrated.contains(stage) {
                issue_entries.hydrated.push(*stage);
            }
        }
        tracing::debug!(issue_id = %issue, ?stages, "hand-off slots invalidated");
        Ok(())
    }

    /// Copy the contents of slot `from` into slot `to`.
    pub async fn promote(&self, issue: &IssueId, from: Stage, to: Stage) -> Result<(), CacheError> {
        let context = self.get(issue, from).await?;
        for entry in context.entries {
            self.put(issue, to, entry).await?;
        }
        Ok(())
    }

    /// Discard everything held for the issue.
    pub async fn clear(&self, issue: &IssueId) -> Result<(), CacheError> {
        if let Some(store) = &self.store {
            store.clear(issue).await?;
        }
        *self.entries(issue).write().await = IssueEntries::default();
        Ok(())
    }

    /// Retain the issue's entries read-only for inspection.
    pub async fn seal(&self, issue: &IssueId) -> Result<(), CacheError> {
        let entries = self.entries(issue);
        match &self.store {
            Some(store) => {
                store.seal(issue).await?;
                *entries.write().await = IssueEntries::default();
            }
            None => entries.write().await.sealed = true,
        }
        Ok(())
    }

    /// Entries sealed when the workflow was cancelled.
    pub async fn sealed(&self, issue: &IssueId) -> Result<Vec<(Stage, StageOutput)>, CacheError> {
        if let Some(store) = &self.store {
            return Ok(store.load_sealed(issue).await?);
        }

        let entries = self.entries(issue);
        let entries = entries.read().await;
        if !entries.sealed {
            return Ok(Vec::new());
        }
        Ok(entries
            .slots
            .iter()
            .flat_map(|(stage, slot)| slot.iter().map(|o| (*stage, o.clone())))
            .collect())
    }

    async fn hydrate(
        &self,
        issue: &IssueId,
        entries: &RwLock<IssueEntries>,
        stage: Stage,
    ) -> Result<(), CacheError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if entries.read().await.hydrated.contains(&stage) {
            return Ok(());
        }

        let loaded = store.load_live(issue, stage).await?;
        let mut entries = entries.write().await;
        if !entries.hydrated.contains(&stage) {
            entries.hydrated.push(stage);
            entries.slots.insert(stage, loaded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::models::{ChangeOutput, PlanOutput};

    fn plan() -> StageOutput {
        StageOutput::Plan(PlanOutput {
            summary: "add endpoint".to_string(),
            steps: vec!["write handler".to_string()],
            files: vec![],
        })
    }

    fn code(sha: &str) -> StageOutput {
        StageOutput::Code(ChangeOutput {
            summary: "handler".to_string(),
            files: vec!["src/api.rs".to_string()],
            commit_sha: sha.to_string(),
        })
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ContextCache::new();
        let issue = IssueId::new("I1");
        cache.put(&issue, Stage::Coding, plan()).await.unwrap();

        let ctx = cache.get(&issue, Stage::Coding).await.unwrap();
        assert_eq!(ctx.entries.len(), 1);
        assert!(ctx.plan().is_some());
    }

    #[tokio::test]
    async fn test_missing_slot_is_a_miss() {
        let cache = ContextCache::new();
        let err = cache
            .get(&IssueId::new("I1"), Stage::Testing)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Miss { .. }));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_malformed() {
        let cache = ContextCache::new();
        let issue = IssueId::new("I1");
        cache.put(&issue, Stage::Testing, plan()).await.unwrap();

        let err = cache.get(&issue, Stage::Testing).await.unwrap_err();
        assert!(matches!(err, CacheError::Malformed { expected: "change", .. }));
    }

    #[tokio::test]
    async fn test_invalidate_drops_slots() {
        let cache = ContextCache::new();
        let issue = IssueId::new("I1");
        cache.put(&issue, Stage::Testing, code("c1")).await.unwrap();
        cache.put(&issue, Stage::Coding, plan()).await.unwrap();

        cache
            .invalidate(&issue, Stage::Coding.downstream())
            .await
            .unwrap();
        assert!(cache.get(&issue, Stage::Testing).await.is_err());
        assert!(cache.get(&issue, Stage::Coding).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_through_survives_new_cache() {
        let store = Arc::new(MemoryStore::new());
        let issue = IssueId::new("I1");
        {
            let cache = ContextCache::with_store(store.clone());
            cache.put(&issue, Stage::AwaitingPipeline, code("c1")).await.unwrap();
            cache
                .promote(&issue, Stage::AwaitingPipeline, Stage::Testing)
                .await
                .unwrap();
        }

        let fresh = ContextCache::with_store(store);
        let ctx = fresh.get(&issue, Stage::Testing).await.unwrap();
        assert_eq!(
            ctx.latest_change().map(|c| c.commit_sha.as_str()),
            Some("c1")
        );
    }

    #[tokio::test]
    async fn test_seal_retains_entries_for_inspection() {
        let store = Arc::new(MemoryStore::new());
        let issue = IssueId::new("I1");
        let cache = ContextCache::with_store(store);
        cache.put(&issue, Stage::Coding, plan()).await.unwrap();

        cache.seal(&issue).await.unwrap();
        assert!(cache.get(&issue, Stage::Coding).await.is_err());

        let sealed = cache.sealed(&issue).await.unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].0, Stage::Coding);
    }

    #[tokio::test]
    async fn test_issues_do_not_share_slots() {
        let cache = ContextCache::new();
        let first = IssueId::new("I1");
        let second = IssueId::new("I2");
        cache.put(&first, Stage::Coding, plan()).await.unwrap();

        // Holding one issue's slots does not block another issue.
        let held = cache.entries(&first);
        let _guard = held.write().await;
        cache.put(&second, Stage::Coding, plan()).await.unwrap();
        assert!(cache.get(&second, Stage::Coding).await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = Arc::new(MemoryStore::new());
        let issue = IssueId::new("I1");
        let cache = ContextCache::with_store(store.clone());
        cache.put(&issue, Stage::Coding, plan()).await.unwrap();

        cache.clear(&issue).await.unwrap();
        let fresh = ContextCache::with_store(store);
        assert!(fresh.get(&issue, Stage::Coding).await.is_err());
    }
}
