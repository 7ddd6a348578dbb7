//! Implementation of the `shepherd start` command.

use anyhow::{Context, Result};
use clap::Args;

use crate::adapters::sqlite::SqliteWorkflowStore;
use crate::cli::open_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, IssueId};
use crate::services::{enrol_issue, StatusReport};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Issue identifier in the tracker
    pub issue_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct StartOutput {
    pub run_id: String,
    pub work_branch: String,
    #[serde(flatten)]
    pub status: StatusReport,
}

impl CommandOutput for StartOutput {
    fn to_human(&self) -> String {
        format!(
            "Workflow started for issue {}\n  Run: {}\n  Branch: {}\n  Stage: {}",
            self.status.issue_id, self.run_id, self.work_branch, self.status.stage
        )
    }
}

pub async fn execute(args: StartArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let store = SqliteWorkflowStore::new(pool);
    let issue_id = IssueId::new(args.issue_id);

    let issue = enrol_issue(&store, &config.vcs, &issue_id)
        .await
        .with_context(|| format!("Failed to start workflow for issue {issue_id}"))?;

    let output_data = StartOutput {
        run_id: issue.run_id.to_string(),
        work_branch: issue.work_branch.clone(),
        status: StatusReport::from(&issue),
    };
    output(&output_data, json_mode);
    Ok(())
}
