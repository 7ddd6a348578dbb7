//! SQLite implementation of the HandoffStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::parse_json;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{IssueId, Stage, StageOutput};
use crate::domain::ports::HandoffStore;

#[derive(Clone)]
pub struct SqliteHandoffStore {
    pool: SqlitePool,
}

impl SqliteHandoffStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HandoffStore for SqliteHandoffStore {
    async fn append(
        &self,
        issue: &IssueId,
        stage: Stage,
        output: &StageOutput,
    ) -> DomainResult<()> {
        let payload = serde_json::to_string(output)?;

        sqlx::query(
            "INSERT INTO handoffs (issue_id, stage, payload, sealed, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(issue.as_str())
        .bind(stage.as_str())
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_live(&self, issue: &IssueId, stage: Stage) -> DomainResult<Vec<StageOutput>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM handoffs WHERE issue_id = ? AND stage = ? AND sealed = 0 ORDER BY id",
        )
        .bind(issue.as_str())
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(payload,)| parse_json(payload)).collect()
    }

    async fn remove_stages(&self, issue: &IssueId, stages: &[Stage]) -> DomainResult<()> {
        if stages.is_empty() {
            return Ok(());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM handoffs WHERE sealed = 0 AND issue_id = ");
        query.push_bind(issue.as_str());
        query.push(" AND stage IN (");
        let mut separated = query.separated(", ");
        for stage in stages {
            separated.push_bind(stage.as_str());
        }
        separated.push_unseparated(")");

        query.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn clear(&self, issue: &IssueId) -> DomainResult<()> {
        sqlx::query("DELETE FROM handoffs WHERE issue_id = ? AND sealed = 0")
            .bind(issue.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seal(&self, issue: &IssueId) -> DomainResult<()> {
        sqlx::query("UPDATE handoffs SET sealed = 1 WHERE issue_id = ?")
            .bind(issue.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_sealed(&self, issue: &IssueId) -> DomainResult<Vec<(Stage, StageOutput)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT stage, payload FROM handoffs WHERE issue_id = ? AND sealed = 1 ORDER BY id",
        )
        .bind(issue.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|(stage, payload)| {
                let stage = Stage::from_str(stage).ok_or_else(|| {
                    DomainError::SerializationError(format!("Invalid stage: {stage}"))
                })?;
                Ok((stage, parse_json(payload)?))
            })
            .collect()
    }
}
