mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use shepherd::adapters::mock::{AgentScript, PipelineScript};
use shepherd::domain::models::{LastOutcome, PipelineStatus, ReviewDecision};
use shepherd::services::EventDisposition;
use shepherd::{FailureClass, IssueId, Outcome, PipelineEvent, PipelineId, Stage, StageOutput};

use common::{drive, path, test_config, World};

#[tokio::test(start_paused = true)]
async fn test_testing_failure_is_retried_then_merged() {
    let world = World::in_memory();
    world.ci.script(
        "c2",
        PipelineScript::fail_after(1, vec![("unit-tests", "line 1\nassertion failed: ok")]),
    );
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");

    supervisor.start_workflow(&id).await.unwrap();
    let transitions = drive(&supervisor, &id).await;

    assert_eq!(
        path(&transitions),
        vec![
            (Stage::Planning, Stage::Coding),
            (Stage::Coding, Stage::AwaitingPipeline),
            (Stage::AwaitingPipeline, Stage::Testing),
            (Stage::Testing, Stage::AwaitingPipeline),
            (Stage::AwaitingPipeline, Stage::Testing),
            (Stage::Testing, Stage::AwaitingPipeline),
            (Stage::AwaitingPipeline, Stage::Reviewing),
            (Stage::Reviewing, Stage::Merged),
        ]
    );

    let status = supervisor.get_status(&id).await.unwrap();
    assert_eq!(status.stage, Stage::Merged);
    assert_eq!(status.retry_counts, BTreeMap::from([(Stage::Testing, 1)]));
    assert_eq!(status.last_commit_sha.as_deref(), Some("c3"));

    let commits: Vec<_> = world
        .ci
        .triggered()
        .into_iter()
        .map(|(_, sha, id)| (sha, id.to_string()))
        .collect();
    assert_eq!(
        commits,
        vec![
            ("c1".to_string(), "p1".to_string()),
            ("c2".to_string(), "p2".to_string()),
            ("c3".to_string(), "p3".to_string()),
        ]
    );
    assert_eq!(world.vcs.merges().len(), 1);
    assert!(supervisor.tracked_pipeline(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retried_testing_receives_failure_trace() {
    let world = World::in_memory();
    world.ci.script(
        "c2",
        PipelineScript::fail_after(0, vec![("unit-tests", "assertion failed: ok")]),
    );
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();
    drive(&supervisor, &id).await;

    let retry = world
        .agent
        .invocations()
        .into_iter()
        .find(|inv| inv.stage == Stage::Testing && inv.attempt == 1)
        .expect("testing was retried");
    assert_eq!(retry.context_kinds, vec!["code", "ci_failure"]);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_stage_exhausts_budget() {
    let world = World::in_memory();
    world.agent.always(Stage::Coding, AgentScript::retry("cannot compile"));
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();

    let transitions = drive(&supervisor, &id).await;

    // Planning, three retries, then the exhausting attempt
    assert_eq!(transitions.len(), 5);
    let status = supervisor.get_status(&id).await.unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.retry_counts.get(&Stage::Coding), Some(&3));
    match status.outcome {
        Some(Outcome::Failed { class, reason }) => {
            assert_eq!(class, FailureClass::RetryBudgetExhausted);
            assert!(reason.contains("coding"));
            assert!(reason.contains("cannot compile"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_timeout_cancels_and_retries() {
    let world = World::in_memory();
    world.ci.script("c1", PipelineScript::never_finishes());
    let mut config = test_config();
    config.pipeline.timeout_secs = 30;
    let supervisor = world.supervisor(config);
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();

    let status = supervisor.run_workflow(&id).await.unwrap();

    assert_eq!(status.stage, Stage::Merged);
    assert_eq!(status.retry_counts.get(&Stage::Coding), Some(&1));
    assert_eq!(world.ci.cancelled(), vec![PipelineId::new("p1")]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_event_is_discarded() {
    let world = World::in_memory();
    world.ci.script("c1", PipelineScript::never_finishes());
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();

    supervisor.advance(&id).await.unwrap();
    let to_pipeline = supervisor.advance(&id).await.unwrap();
    assert_eq!(to_pipeline.to, Stage::AwaitingPipeline);
    assert_eq!(
        supervisor.tracked_pipeline(&id).map(|run| run.id),
        Some(PipelineId::new("p1"))
    );

    let stale = PipelineEvent {
        issue_id: id.clone(),
        pipeline_id: PipelineId::new("p0"),
        status: PipelineStatus::Failed,
    };
    assert_eq!(
        supervisor.deliver_pipeline_event(&stale),
        EventDisposition::Discarded
    );
    let status = supervisor.get_status(&id).await.unwrap();
    assert_eq!(status.stage, Stage::AwaitingPipeline);
    assert!(status.retry_counts.is_empty());

    let current = PipelineEvent {
        issue_id: id.clone(),
        pipeline_id: PipelineId::new("p1"),
        status: PipelineStatus::Success,
    };
    assert_eq!(
        supervisor.deliver_pipeline_event(&current),
        EventDisposition::Accepted
    );

    let transition = supervisor.advance(&id).await.unwrap();
    assert_eq!(transition.to, Stage::Testing);
    assert_eq!(
        transition.outcome,
        Some(LastOutcome::PipelineSucceeded {
            pipeline_id: PipelineId::new("p1")
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_agent_and_seals_handoffs() {
    let world = World::in_memory();
    world.agent.always(
        Stage::Coding,
        AgentScript::commit_and_succeed("src/lib.rs").with_delay(Duration::from_secs(600)),
    );
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();

    let driver = tokio::spawn({
        let supervisor = supervisor.clone();
        let id = id.clone();
        async move { supervisor.run_workflow(&id).await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;

    let status = supervisor.cancel_workflow(&id).await.unwrap();
    assert_eq!(status.stage, Stage::Cancelled);
    assert_eq!(status.outcome, Some(Outcome::Cancelled));

    let finished = driver.await.unwrap().unwrap();
    assert_eq!(finished.stage, Stage::Cancelled);
    assert!(world.vcs.commits().is_empty());

    let sealed = supervisor.sealed_handoffs(&id).await.unwrap();
    assert!(matches!(
        sealed.as_slice(),
        [(Stage::Coding, StageOutput::Plan(_))]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_awaiting_cancels_pipeline() {
    let world = World::in_memory();
    world.ci.script("c1", PipelineScript::never_finishes());
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();
    supervisor.advance(&id).await.unwrap();
    supervisor.advance(&id).await.unwrap();

    let driver = tokio::spawn({
        let supervisor = supervisor.clone();
        let id = id.clone();
        async move { supervisor.advance(&id).await }
    });
    tokio::time::sleep(Duration::from_secs(3)).await;

    let status = supervisor.cancel_workflow(&id).await.unwrap();
    assert_eq!(status.stage, Stage::Cancelled);
    assert_eq!(driver.await.unwrap().unwrap().to, Stage::Cancelled);
    assert_eq!(world.ci.cancelled(), vec![PipelineId::new("p1")]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_terminal_gets_new_run() {
    let world = World::in_memory();
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");

    let first = supervisor.start_workflow(&id).await.unwrap();
    supervisor.cancel_workflow(&id).await.unwrap();
    let second = supervisor.start_workflow(&id).await.unwrap();

    assert_eq!(second.stage, Stage::Planning);
    assert!(second.retry_counts.is_empty());
    assert!(second.updated_at >= first.updated_at);

    let status = supervisor.run_workflow(&id).await.unwrap();
    assert_eq!(status.stage, Stage::Merged);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_issues_progress_in_parallel() {
    let world = World::in_memory();
    world.agent.always(
        Stage::Planning,
        AgentScript::succeed().with_delay(Duration::from_secs(60)),
    );
    world
        .agent
        .always(Stage::Reviewing, AgentScript::review(ReviewDecision::Approve));
    let supervisor = world.supervisor(test_config());

    for id in ["I1", "I2", "I3"] {
        supervisor.start_workflow(&IssueId::new(id)).await.unwrap();
    }
    let started = tokio::time::Instant::now();
    let handles = supervisor.resume_all().await.unwrap();
    assert_eq!(handles.len(), 3);

    for (id, handle) in handles {
        let status = handle.await.unwrap().unwrap();
        assert_eq!(status.stage, Stage::Merged, "issue {id}");
    }
    // Sequential planning alone would take three minutes.
    assert!(started.elapsed() < Duration::from_secs(180));
}
