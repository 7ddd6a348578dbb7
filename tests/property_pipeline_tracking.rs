//! Property tests for the pipeline monitor's single-run-per-issue tracking.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;
use shepherd::adapters::mock::MockCiBackend;
use shepherd::domain::models::{PipelineConfig, PipelineStatus};
use shepherd::{IssueId, PipelineEvent, PipelineMonitor};

#[derive(Debug, Clone)]
enum Op {
    /// Concurrent submits for one issue as (commit, trigger delay in ms)
    Submit { issue: u8, submits: Vec<(u8, u8)> },
    /// A pushed event naming the n-th pipeline ever triggered
    Event { issue: u8, pipeline: u8 },
    Untrack { issue: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..3, prop::collection::vec((0u8..5, 0u8..50), 1..5))
            .prop_map(|(issue, submits)| Op::Submit { issue, submits }),
        2 => (0u8..3, 1u8..12).prop_map(|(issue, pipeline)| Op::Event { issue, pipeline }),
        1 => (0u8..3).prop_map(|issue| Op::Untrack { issue }),
    ]
}

fn issue_id(n: u8) -> IssueId {
    IssueId::new(format!("I{n}"))
}

fn branch(n: u8) -> String {
    format!("shepherd/issue-I{n}")
}

/// Paused clock, so trigger delays reorder submits without real waiting.
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_at_most_one_live_run_per_issue(ops in prop::collection::vec(op_strategy(), 1..20)) {
        runtime().block_on(async {
            let ci = Arc::new(MockCiBackend::new());
            let monitor = PipelineMonitor::new(ci.clone(), PipelineConfig::default());

            for op in &ops {
                match op {
                    Op::Submit { issue, submits } => {
                        let id = issue_id(*issue);
                        let branch = branch(*issue);
                        for (sha, delay) in submits {
                            ci.delay_trigger(&format!("c{sha}"), Duration::from_millis(u64::from(*delay)));
                        }
                        let pending = submits.iter().map(|(sha, _)| {
                            let sha = format!("c{sha}");
                            let monitor = &monitor;
                            let id = &id;
                            let branch = &branch;
                            async move { monitor.submit(id, branch, &sha).await }
                        });
                        for result in join_all(pending).await {
                            prop_assert!(result.is_ok());
                        }

                        // Whatever order the triggers answered in, the last submit issued wins.
                        let last = submits.last().map(|(sha, _)| format!("c{sha}"));
                        prop_assert_eq!(monitor.tracked(&id).map(|run| run.commit_sha), last);
                    }
                    Op::Event { issue, pipeline } => {
                        let id = issue_id(*issue);
                        let tracked = monitor.tracked(&id);
                        let event = PipelineEvent {
                            issue_id: id.clone(),
                            pipeline_id: shepherd::PipelineId::new(format!("p{pipeline}")),
                            status: PipelineStatus::Running,
                        };
                        let accepted = monitor.observe(&event)
                            == shepherd::services::EventDisposition::Accepted;
                        let expected = tracked.is_some_and(|run| run.id == event.pipeline_id);
                        prop_assert_eq!(accepted, expected);
                    }
                    Op::Untrack { issue } => monitor.untrack(&issue_id(*issue), true).await,
                }

                for issue in 0u8..3 {
                    let tracked = monitor.tracked(&issue_id(issue));
                    let live: Vec<_> = ci
                        .triggered()
                        .into_iter()
                        .filter(|(b, _, _)| *b == branch(issue))
                        .filter(|(_, _, id)| ci.status_of(id) != Some(PipelineStatus::Canceled))
                        .map(|(_, _, id)| id)
                        .collect();

                    prop_assert!(live.len() <= 1, "issue {} has live runs {:?}", issue, live);
                    match tracked {
                        Some(run) => prop_assert_eq!(live, vec![run.id]),
                        None => prop_assert!(live.is_empty()),
                    }
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_resubmitting_tracked_commit_triggers_nothing(sha in 0u8..10, repeats in 1usize..5) {
        runtime().block_on(async {
            let ci = Arc::new(MockCiBackend::new());
            let monitor = PipelineMonitor::new(ci.clone(), PipelineConfig::default());
            let id = issue_id(0);
            let sha = format!("c{sha}");

            let first = monitor.submit(&id, &branch(0), &sha).await.unwrap();
            for _ in 0..repeats {
                let again = monitor.submit(&id, &branch(0), &sha).await.unwrap();
                prop_assert_eq!(&again.id, &first.id);
            }
            prop_assert_eq!(ci.triggered().len(), 1);
            prop_assert!(ci.cancelled().is_empty());
            Ok(())
        })?;
    }
}
