//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use shepherd::adapters::memory::MemoryStore;
use shepherd::adapters::mock::{MockAgentRuntime, MockCiBackend, MockVcs};
use shepherd::adapters::sqlite::{create_migrated_test_pool, SqliteHandoffStore, SqliteWorkflowStore};
use shepherd::domain::ports::{HandoffStore, WorkflowStore};
use shepherd::{Backends, Config, IssueId, Stage, Transition, WorkflowSupervisor};

/// The outside world: CI, VCS and agent doubles plus the durable stores.
///
/// Cloning shares every double, so a fresh supervisor built from a clone
/// sees the same backend state, which is how tests simulate a restart.
#[derive(Clone)]
pub struct World {
    pub ci: Arc<MockCiBackend>,
    pub vcs: Arc<MockVcs>,
    pub agent: Arc<MockAgentRuntime>,
    pub store: Arc<dyn WorkflowStore>,
    pub handoffs: Arc<dyn HandoffStore>,
}

impl World {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            ci: Arc::new(MockCiBackend::new()),
            vcs: Arc::new(MockVcs::new()),
            agent: Arc::new(MockAgentRuntime::new()),
            store: store.clone(),
            handoffs: store,
        }
    }

    pub async fn sqlite() -> Self {
        let pool = create_migrated_test_pool()
            .await
            .expect("failed to create test database");
        Self {
            ci: Arc::new(MockCiBackend::new()),
            vcs: Arc::new(MockVcs::new()),
            agent: Arc::new(MockAgentRuntime::new()),
            store: Arc::new(SqliteWorkflowStore::new(pool.clone())),
            handoffs: Arc::new(SqliteHandoffStore::new(pool)),
        }
    }

    pub fn supervisor(&self, config: Config) -> Arc<WorkflowSupervisor> {
        Arc::new(WorkflowSupervisor::new(
            config,
            Backends {
                ci: self.ci.clone(),
                vcs: self.vcs.clone(),
                agent: self.agent.clone(),
                store: self.store.clone(),
                handoffs: Some(self.handoffs.clone()),
            },
        ))
    }
}

/// Short polling so paused-clock tests stay quick to reason about.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.initial_poll_secs = 1;
    config.pipeline.max_poll_secs = 8;
    config.pipeline.timeout_secs = 120;
    config
}

/// Advance until terminal, collecting every transition that moved the issue.
pub async fn drive(supervisor: &WorkflowSupervisor, id: &IssueId) -> Vec<Transition> {
    let mut transitions = Vec::new();
    for _ in 0..200 {
        let transition = supervisor.advance(id).await.expect("advance failed");
        let done = transition.to.is_terminal();
        if transition.trigger.is_some() {
            transitions.push(transition);
        }
        if done {
            return transitions;
        }
    }
    panic!("workflow for {id} did not terminate");
}

/// The (from, to) path of a list of transitions.
pub fn path(transitions: &[Transition]) -> Vec<(Stage, Stage)> {
    transitions.iter().map(|t| (t.from, t.to)).collect()
}
