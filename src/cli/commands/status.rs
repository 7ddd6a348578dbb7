//! Implementation of the `shepherd status` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::sqlite::SqliteWorkflowStore;
use crate::cli::open_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, IssueId, LastOutcome, Outcome};
use crate::domain::ports::WorkflowStore;
use crate::services::StatusReport;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Issue identifier in the tracker
    pub issue_id: String,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct StatusOutput(pub StatusReport);

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let report = &self.0;
        let mut lines = vec![
            format!("Issue {}", report.issue_id),
            format!("  Stage: {}", report.stage),
        ];
        if let Some(origin) = report.pipeline_origin {
            lines.push(format!("  Awaiting pipeline for: {origin}"));
        }
        if let Some(sha) = &report.last_commit_sha {
            lines.push(format!("  Last commit: {sha}"));
        }
        if let Some(pipeline) = &report.tracked_pipeline_id {
            lines.push(format!("  Tracked pipeline: {pipeline}"));
        }
        if report.retry_counts.values().any(|count| *count > 0) {
            let counts: Vec<String> = report
                .retry_counts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(stage, count)| format!("{stage}={count}"))
                .collect();
            lines.push(format!("  Retries: {}", counts.join(", ")));
        }
        if let Some(last) = &report.last_outcome {
            lines.push(format!("  Last outcome: {}", last.summary()));
        }
        match &report.outcome {
            Some(Outcome::Failed { class, reason }) => {
                lines.push(format!("  Outcome: failed ({class}): {reason}"));
            }
            Some(Outcome::Merged { .. }) => lines.push("  Outcome: merged".to_string()),
            Some(Outcome::Cancelled) => lines.push("  Outcome: cancelled".to_string()),
            None if matches!(report.last_outcome, Some(LastOutcome::Retrying { .. })) => {
                lines.push("  Outcome: still retrying".to_string());
            }
            None => {}
        }
        lines.push(format!(
            "  Updated: {}",
            report.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.join("\n")
    }
}

pub async fn execute(args: StatusArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let store = SqliteWorkflowStore::new(pool);
    let issue_id = IssueId::new(args.issue_id);

    let issue = store
        .load(&issue_id)
        .await
        .context("Failed to load workflow")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No workflow for issue {issue_id}. Use 'shepherd list --all' to see known issues."
            )
        })?;

    output(&StatusOutput(StatusReport::from(&issue)), json_mode);
    Ok(())
}
