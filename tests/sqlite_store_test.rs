use std::collections::BTreeMap;

use shepherd::adapters::sqlite::{
    create_migrated_test_pool, create_pool, initialize_database, SqliteHandoffStore,
    SqliteWorkflowStore,
};
use shepherd::domain::models::{
    ChangeOutput, DatabaseConfig, PipelineRun, PipelineStatus, PlanOutput,
};
use shepherd::domain::ports::{HandoffStore, WorkflowStore};
use shepherd::{FailureClass, Issue, IssueId, LastOutcome, Outcome, PipelineId, Stage, StageOutput};

fn plan(summary: &str) -> StageOutput {
    StageOutput::Plan(PlanOutput {
        summary: summary.to_string(),
        steps: vec!["write the code".to_string()],
        files: vec!["src/lib.rs".to_string()],
    })
}

fn code(sha: &str) -> StageOutput {
    StageOutput::Code(ChangeOutput {
        summary: "implemented".to_string(),
        commit_sha: sha.to_string(),
        files: vec!["src/lib.rs".to_string()],
    })
}

#[tokio::test]
async fn test_issue_roundtrip() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);

    let mut issue = Issue::new(IssueId::new("I1"), "shepherd/issue-I1");
    issue.stage = Stage::AwaitingPipeline;
    issue.pipeline_origin = Some(Stage::Testing);
    issue.retry_counts = BTreeMap::from([(Stage::Testing, 1)]);
    issue.last_commit_sha = Some("c2".to_string());
    issue.tracked_pipeline = Some(PipelineRun::new(
        PipelineId::new("p2"),
        "c2",
        PipelineStatus::Running,
    ));
    issue.last_outcome = Some(LastOutcome::Retrying {
        stage: Stage::Testing,
        class: FailureClass::StageFailure,
        reason: "pipeline p2 failed: unit-tests".to_string(),
    });
    store.save(&issue).await.unwrap();

    let loaded = store.load(&issue.id).await.unwrap().expect("issue persisted");
    assert_eq!(loaded.run_id, issue.run_id);
    assert_eq!(loaded.stage, Stage::AwaitingPipeline);
    assert_eq!(loaded.pipeline_origin, Some(Stage::Testing));
    assert_eq!(loaded.retry_counts, issue.retry_counts);
    assert_eq!(loaded.tracked_pipeline, issue.tracked_pipeline);
    assert_eq!(loaded.last_outcome, issue.last_outcome);
    assert_eq!(loaded.outcome, None);
}

#[tokio::test]
async fn test_load_missing_issue() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);
    assert!(store.load(&IssueId::new("nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminal_issues_leave_active_list() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = SqliteWorkflowStore::new(pool);

    let active = Issue::new(IssueId::new("I1"), "shepherd/issue-I1");
    let mut done = Issue::new(IssueId::new("I2"), "shepherd/issue-I2");
    store.save(&active).await.unwrap();
    store.save(&done).await.unwrap();

    done.stage = Stage::Failed;
    done.outcome = Some(Outcome::Failed {
        class: FailureClass::Configuration,
        reason: "missing credentials".to_string(),
    });
    done.diagnostic = Some("missing credentials".to_string());
    done.touch();
    store.save(&done).await.unwrap();

    let ids: Vec<_> = store
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|issue| issue.id)
        .collect();
    assert_eq!(ids, vec![IssueId::new("I1")]);
    assert_eq!(store.list_all().await.unwrap().len(), 2);

    // A restart makes the issue active again.
    let restarted = Issue::new(IssueId::new("I2"), "shepherd/issue-I2");
    store.save(&restarted).await.unwrap();
    assert_eq!(store.list_active().await.unwrap().len(), 2);
    let loaded = store.load(&restarted.id).await.unwrap().unwrap();
    assert_eq!(loaded.run_id, restarted.run_id);
    assert!(loaded.diagnostic.is_none());
}

#[tokio::test]
async fn test_handoffs_live_and_sealed() {
    let pool = create_migrated_test_pool().await.unwrap();
    let handoffs = SqliteHandoffStore::new(pool);
    let id = IssueId::new("I1");

    handoffs.append(&id, Stage::Coding, &plan("first")).await.unwrap();
    handoffs
        .append(&id, Stage::AwaitingPipeline, &code("c1"))
        .await
        .unwrap();
    handoffs.append(&id, Stage::Testing, &code("c1")).await.unwrap();

    assert_eq!(
        handoffs.load_live(&id, Stage::Coding).await.unwrap(),
        vec![plan("first")]
    );

    handoffs
        .remove_stages(&id, &[Stage::AwaitingPipeline, Stage::Testing])
        .await
        .unwrap();
    assert!(handoffs.load_live(&id, Stage::Testing).await.unwrap().is_empty());

    handoffs.seal(&id).await.unwrap();
    assert!(handoffs.load_live(&id, Stage::Coding).await.unwrap().is_empty());

    // Sealed entries survive a clear.
    handoffs.clear(&id).await.unwrap();
    let sealed = handoffs.load_sealed(&id).await.unwrap();
    assert_eq!(sealed, vec![(Stage::Coding, plan("first"))]);
}

#[tokio::test]
async fn test_handoffs_are_per_issue() {
    let pool = create_migrated_test_pool().await.unwrap();
    let handoffs = SqliteHandoffStore::new(pool);

    handoffs
        .append(&IssueId::new("I1"), Stage::Coding, &plan("one"))
        .await
        .unwrap();
    handoffs
        .append(&IssueId::new("I2"), Stage::Coding, &plan("two"))
        .await
        .unwrap();
    handoffs.clear(&IssueId::new("I1")).await.unwrap();

    assert!(handoffs
        .load_live(&IssueId::new("I1"), Stage::Coding)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        handoffs
            .load_live(&IssueId::new("I2"), Stage::Coding)
            .await
            .unwrap(),
        vec![plan("two")]
    );
}

#[tokio::test]
async fn test_on_disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir
            .path()
            .join("nested")
            .join("shepherd.db")
            .display()
            .to_string(),
        max_connections: 2,
    };

    let pool = initialize_database(&config).await.unwrap();
    let issue = Issue::new(IssueId::new("I1"), "shepherd/issue-I1");
    SqliteWorkflowStore::new(pool.clone()).save(&issue).await.unwrap();
    pool.close().await;

    // Migrations are idempotent on reopen.
    let pool = initialize_database(&config).await.unwrap();
    let loaded = SqliteWorkflowStore::new(pool.clone())
        .load(&issue.id)
        .await
        .unwrap();
    assert_eq!(loaded.map(|i| i.run_id), Some(issue.run_id));

    let raw = create_pool(&config).await.unwrap();
    let (applied,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&raw)
        .await
        .unwrap();
    assert_eq!(applied, 1);
}
