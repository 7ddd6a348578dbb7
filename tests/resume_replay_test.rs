mod common;

use shepherd::adapters::mock::PipelineScript;
use shepherd::{IssueId, Stage, Transition};

use common::{drive, test_config, World};

fn script_world(world: &World) {
    for sha in ["c1", "c3", "c4", "c5"] {
        world.ci.script(sha, PipelineScript::succeed_after(0));
    }
    world.ci.script(
        "c2",
        PipelineScript::fail_after(0, vec![("unit-tests", "assertion failed")]),
    );
}

async fn uninterrupted(world: World) -> Vec<Transition> {
    let supervisor = world.supervisor(test_config());
    let id = IssueId::new("I1");
    supervisor.start_workflow(&id).await.unwrap();
    drive(&supervisor, &id).await
}

/// Advance `steps` times, drop the supervisor, and finish on a fresh one.
async fn crash_after(world: World, steps: usize) -> Vec<Transition> {
    let id = IssueId::new("I1");
    let mut transitions = Vec::new();
    {
        let supervisor = world.supervisor(test_config());
        supervisor.start_workflow(&id).await.unwrap();
        for _ in 0..steps {
            transitions.push(supervisor.advance(&id).await.unwrap());
        }
    }

    let restarted = world.supervisor(test_config());
    transitions.extend(drive(&restarted, &id).await);
    transitions
}

#[tokio::test(start_paused = true)]
async fn test_replay_from_every_persisted_stage() {
    let baseline = {
        let world = World::in_memory();
        script_world(&world);
        uninterrupted(world).await
    };
    assert_eq!(baseline.last().map(|t| t.to), Some(Stage::Merged));

    for steps in 1..baseline.len() {
        let world = World::in_memory();
        script_world(&world);
        let replayed = crash_after(world, steps).await;
        assert_eq!(replayed, baseline, "diverged after crash at step {steps}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_resume_all_picks_up_persisted_issues() {
    let world = World::in_memory();
    script_world(&world);
    let id = IssueId::new("I1");
    {
        let supervisor = world.supervisor(test_config());
        supervisor.start_workflow(&id).await.unwrap();
        supervisor.advance(&id).await.unwrap();
        supervisor.advance(&id).await.unwrap();
    }

    let restarted = world.supervisor(test_config());
    let handles = restarted.resume_all().await.unwrap();
    assert_eq!(handles.len(), 1);
    for (_, handle) in handles {
        let status = handle.await.unwrap().unwrap();
        assert_eq!(status.stage, Stage::Merged);
        assert_eq!(status.retry_counts.get(&Stage::Testing), Some(&1));
    }
    assert!(restarted.resume_all().await.unwrap().is_empty());
}

// Real clock: the SQLite worker thread does not cooperate with a paused runtime.
#[tokio::test]
async fn test_sqlite_replay_matches_uninterrupted_run() {
    let baseline = {
        let world = World::sqlite().await;
        script_world(&world);
        uninterrupted(world).await
    };

    for steps in [2, 4, 5] {
        let world = World::sqlite().await;
        script_world(&world);
        let replayed = crash_after(world, steps).await;
        assert_eq!(replayed, baseline, "diverged after crash at step {steps}");
    }
}
