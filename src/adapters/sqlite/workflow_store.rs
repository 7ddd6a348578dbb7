//! SQLite implementation of the WorkflowStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{parse_datetime, parse_json, parse_optional_json};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Issue, IssueId, Stage};
use crate::domain::ports::WorkflowStore;

const ISSUE_COLUMNS: &str = "id, run_id, stage, pipeline_origin, work_branch, last_commit_sha, tracked_pipeline, retry_counts, last_outcome, outcome, diagnostic, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn load(&self, id: &IssueId) -> DomainResult<Option<Issue>> {
        let row: Option<IssueRow> =
            sqlx::query_as(&format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn save(&self, issue: &Issue) -> DomainResult<()> {
        let tracked_json = issue
            .tracked_pipeline
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let retry_json = serde_json::to_string(&issue.retry_counts)?;
        let last_outcome_json = issue
            .last_outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let outcome_json = issue.outcome.as_ref().map(serde_json::to_string).transpose()?;
        let archived_at = issue.is_terminal().then(|| Utc::now().to_rfc3339());

        sqlx::query(
            r#"INSERT INTO issues (id, run_id, stage, pipeline_origin, work_branch, last_commit_sha,
                   tracked_pipeline, retry_counts, last_outcome, outcome, diagnostic, created_at, updated_at, archived_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   run_id = excluded.run_id,
                   stage = excluded.stage,
                   pipeline_origin = excluded.pipeline_origin,
                   work_branch = excluded.work_branch,
                   last_commit_sha = excluded.last_commit_sha,
                   tracked_pipeline = excluded.tracked_pipeline,
                   retry_counts = excluded.retry_counts,
                   last_outcome = excluded.last_outcome,
                   outcome = excluded.outcome,
                   diagnostic = excluded.diagnostic,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   archived_at = CASE WHEN excluded.archived_at IS NULL THEN NULL
                       ELSE COALESCE(issues.archived_at, excluded.archived_at) END"#,
        )
        .bind(issue.id.as_str())
        .bind(issue.run_id.to_string())
        .bind(issue.stage.as_str())
        .bind(issue.pipeline_origin.map(|s| s.as_str()))
        .bind(&issue.work_branch)
        .bind(&issue.last_commit_sha)
        .bind(tracked_json)
        .bind(retry_json)
        .bind(last_outcome_json)
        .bind(outcome_json)
        .bind(&issue.diagnostic)
        .bind(issue.created_at.to_rfc3339())
        .bind(issue.updated_at.to_rfc3339())
        .bind(archived_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active(&self) -> DomainResult<Vec<Issue>> {
        let rows: Vec<IssueRow> = sqlx::query_as(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE stage NOT IN ('merged', 'failed', 'cancelled') ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<Issue>> {
        let rows: Vec<IssueRow> = sqlx::query_as(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct IssueRow {
    id: String,
    run_id: String,
    stage: String,
    pipeline_origin: Option<String>,
    work_branch: String,
    last_commit_sha: Option<String>,
    tracked_pipeline: Option<String>,
    retry_counts: String,
    last_outcome: Option<String>,
    outcome: Option<String>,
    diagnostic: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_stage(s: &str) -> DomainResult<Stage> {
    Stage::from_str(s).ok_or_else(|| DomainError::SerializationError(format!("Invalid stage: {s}")))
}

impl TryFrom<IssueRow> for Issue {
    type Error = DomainError;

    fn try_from(row: IssueRow) -> Result<Self, Self::Error> {
        let run_id = uuid::Uuid::parse_str(&row.run_id)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(Issue {
            id: IssueId::from(row.id),
            run_id,
            stage: parse_stage(&row.stage)?,
            pipeline_origin: row.pipeline_origin.as_deref().map(parse_stage).transpose()?,
            retry_counts: parse_json(&row.retry_counts)?,
            work_branch: row.work_branch,
            last_commit_sha: row.last_commit_sha,
            tracked_pipeline: parse_optional_json(row.tracked_pipeline)?,
            last_outcome: parse_optional_json(row.last_outcome)?,
            outcome: parse_optional_json(row.outcome)?,
            diagnostic: row.diagnostic,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
