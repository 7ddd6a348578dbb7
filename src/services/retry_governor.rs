//! Per-(issue, stage) retry budgets.

use std::collections::BTreeMap;

use crate::domain::models::{Issue, RetryConfig, Stage};

/// Decides whether a stage may be retried and records consumption on the issue.
///
/// Counts live on [`Issue::retry_counts`] so they are persisted with the
/// issue and survive restarts. The governor only holds the limits.
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    default_max: u32,
    per_stage: BTreeMap<Stage, u32>,
}

impl RetryGovernor {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            default_max: config.max_attempts,
            per_stage: config.per_stage.clone(),
        }
    }

    pub fn max_attempts(&self, stage: Stage) -> u32 {
        self.per_stage.get(&stage).copied().unwrap_or(self.default_max)
    }

    pub fn remaining(&self, issue: &Issue, stage: Stage) -> u32 {
        self.max_attempts(stage)
            .saturating_sub(issue.retry_count(stage))
    }

    /// Consume one retry for `stage` if any remain.
    ///
    /// Returns `false` without touching the counts once the budget is spent,
    /// so a count never exceeds the configured maximum and a stage that was
    /// never charged gets no entry.
    pub fn try_consume(&self, issue: &mut Issue, stage: Stage) -> bool {
        if issue.retry_count(stage) >= self.max_attempts(stage) {
            return false;
        }
        *issue.retry_counts.entry(stage).or_insert(0) += 1;
        true
    }
}
