//! Mock version-control backend for testing.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use crate::domain::ports::{VcsBackend, VcsError};

/// A commit recorded by [`MockVcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommit {
    pub branch: String,
    pub path: String,
    pub sha: String,
}

#[derive(Debug, Default)]
struct MockVcsState {
    commits: Vec<MockCommit>,
    merges: Vec<(String, String, String)>,
    fail_merges: bool,
}

/// In-memory VCS handing out sequential SHAs (`c1`, `c2`, ...; merges `m1`, ...).
#[derive(Debug, Default)]
pub struct MockVcs {
    state: Mutex<MockVcsState>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockVcsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn commits(&self) -> Vec<MockCommit> {
        self.state().commits.clone()
    }

    /// Merges as (source, target, merge sha).
    pub fn merges(&self) -> Vec<(String, String, String)> {
        self.state().merges.clone()
    }

    /// Make every merge fail with a conflict.
    pub fn fail_merges(&self, fail: bool) {
        self.state().fail_merges = fail;
    }
}

#[async_trait]
impl VcsBackend for MockVcs {
    async fn create_or_update_file(
        &self,
        branch: &str,
        path: &str,
        _content: &str,
        _message: &str,
    ) -> Result<String, VcsError> {
        let mut state = self.state();
        let sha = format!("c{}", state.commits.len() + 1);
        state.commits.push(MockCommit {
            branch: branch.to_string(),
            path: path.to_string(),
            sha: sha.clone(),
        });
        Ok(sha)
    }

    async fn merge_branch(&self, source: &str, target: &str) -> Result<String, VcsError> {
        let mut state = self.state();
        if state.fail_merges {
            return Err(VcsError::Conflict(format!("{source} conflicts with {target}")));
        }
        let sha = format!("m{}", state.merges.len() + 1);
        state
            .merges
            .push((source.to_string(), target.to_string(), sha.clone()));
        Ok(sha)
    }
}
