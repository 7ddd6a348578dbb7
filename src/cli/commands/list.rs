//! Implementation of the `shepherd list` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::sqlite::SqliteWorkflowStore;
use crate::cli::open_database;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::Config;
use crate::domain::ports::WorkflowStore;
use crate::services::StatusReport;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include merged, failed and cancelled workflows
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub workflows: Vec<StatusReport>,
}

impl CommandOutput for ListOutput {
    fn to_human(&self) -> String {
        if self.workflows.is_empty() {
            return "No workflows found.".to_string();
        }

        let mut table = list_table(&["issue", "stage", "retries", "pipeline", "last outcome"]);
        for report in &self.workflows {
            let retries: u32 = report.retry_counts.values().sum();
            table.add_row(vec![
                report.issue_id.to_string(),
                report.stage.to_string(),
                retries.to_string(),
                report
                    .tracked_pipeline_id
                    .as_ref()
                    .map_or_else(|| "-".to_string(), ToString::to_string),
                report
                    .last_outcome
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |o| truncate(&o.summary(), 60)),
            ]);
        }

        let noun = if self.workflows.len() == 1 { "workflow" } else { "workflows" };
        format!("{} {noun}:\n{table}", self.workflows.len())
    }
}

pub async fn execute(args: ListArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let store = SqliteWorkflowStore::new(pool);

    let issues = if args.all {
        store.list_all().await
    } else {
        store.list_active().await
    }
    .context("Failed to list workflows")?;

    let output_data = ListOutput {
        workflows: issues.iter().map(StatusReport::from).collect(),
    };
    output(&output_data, json_mode);
    Ok(())
}
