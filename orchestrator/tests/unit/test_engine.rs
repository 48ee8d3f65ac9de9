//! Orchestrator tests against scripted collaborators

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use deploymaster::deploy::RunOptions;
use deploymaster::models::task::TaskStatus;
use deploymaster::store::TaskStore;

use crate::fixtures::{logged, task, HarnessBuilder, ScriptedDriver, LATEST_REVISION};

#[tokio::test]
async fn test_master_only_run_skips_syncing() {
    let h = HarnessBuilder::new()
        .task(task(&[], &["./restart.sh"]))
        .build()
        .await;
    let mut events = h.orchestrator.subscribe();

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let run = h.wait_finished(&run.id).await;

    assert_eq!(run.status, TaskStatus::Success);
    assert_eq!(run.progress, 100);
    assert_eq!(run.revision.as_deref(), Some(LATEST_REVISION));
    assert_eq!(h.driver.pushed_to(), vec!["m".to_string()]);
    assert_eq!(h.driver.executed_on(), vec!["m".to_string()]);
    assert!(logged(&run, "[M] Commands completed successfully"));

    while let Ok(event) = events.try_recv() {
        assert_ne!(event.status, TaskStatus::Syncing);
    }

    let task = h.store.get_task("task-1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100);
    assert_eq!(task.last_run_at, run.started_at);

    // staging is cleaned up after the run leaves the live set
    let staging = h.staging_root.join(&run.id);
    let cleaned = async {
        while staging.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    assert_ok!(tokio::time::timeout(Duration::from_secs(5), cleaned).await);
}

#[tokio::test]
async fn test_second_start_conflicts_while_in_flight() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().push_delay("m", Duration::from_millis(300)))
        .task(task(&["s1"], &[]))
        .build()
        .await;

    let first = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let err = assert_err!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    assert_eq!(err.kind(), "conflict");
    assert!(h.orchestrator.has_active_run("task-1").await);

    h.wait_finished(&first.id).await;
    let second = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    assert_ne!(first.id, second.id);
    h.wait_finished(&second.id).await;

    assert_eq!(h.store.list_runs(Some("task-1")).await.len(), 2);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let h = HarnessBuilder::new()
        .task(task(&["s1", "s2"], &["./stop.sh", "./start.sh"]))
        .build()
        .await;
    let mut events = h.orchestrator.subscribe();

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);

    let mut last = 0;
    let mut statuses = Vec::new();
    let collect = async {
        loop {
            let event = events.recv().await.unwrap();
            if event.run_id != run.id {
                continue;
            }
            assert!(event.progress >= last, "progress went from {} to {}", last, event.progress);
            last = event.progress;
            if statuses.last() != Some(&event.status) {
                statuses.push(event.status);
            }
            if event.finished {
                break;
            }
        }
    };
    assert_ok!(tokio::time::timeout(Duration::from_secs(10), collect).await);

    assert_eq!(last, 100);
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Idle,
            TaskStatus::Downloading,
            TaskStatus::Uploading,
            TaskStatus::Syncing,
            TaskStatus::Executing,
            TaskStatus::Success,
        ]
    );
}

#[tokio::test]
async fn test_slave_timeout_fails_run_below_full_progress() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().push_delay("s2", Duration::from_secs(3)))
        .node_timeout(Duration::from_millis(300))
        .task(task(&["s1", "s2"], &["./restart.sh"]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let run = h.wait_finished(&run.id).await;

    assert_eq!(run.status, TaskStatus::Failed);
    assert!(run.progress < 100);
    assert!(logged(&run, "[S2] [SYNCING] Transport error: transfer on S2 timed out"));
    assert!(logged(&run, "[S2] skipped: commands not run"));
    assert!(logged(&run, "[M] Commands completed successfully"));
    assert!(logged(&run, "[S1] Commands completed successfully"));

    let mut executed = h.driver.executed_on();
    executed.sort();
    assert_eq!(executed, vec!["m".to_string(), "s1".to_string()]);
}

#[tokio::test]
async fn test_command_failure_is_scoped_to_its_node() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().exit_code("s1", 3))
        .task(task(&["s1", "s2"], &["./restart.sh", "./smoke.sh"]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let run = h.wait_finished(&run.id).await;

    assert_eq!(run.status, TaskStatus::Failed);
    assert!(logged(&run, "[S1] [EXECUTING] Command `./restart.sh` exited with code 3"));
    assert!(logged(&run, "[S2] Commands completed successfully"));
    assert!(logged(&run, "[M] Commands completed successfully"));

    // s1 stops after its first failing command
    let s1_commands = h
        .driver
        .execs
        .lock()
        .unwrap()
        .iter()
        .filter(|(node, _)| node == "s1")
        .count();
    assert_eq!(s1_commands, 1);
}

#[tokio::test]
async fn test_failed_master_upload_skips_slaves() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().failing_push("m"))
        .task(task(&["s1"], &["./restart.sh"]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let run = h.wait_finished(&run.id).await;

    assert_eq!(run.status, TaskStatus::Failed);
    assert!(logged(&run, "[M] [UPLOADING] Transport error"));
    assert!(logged(&run, "[S1] skipped: master upload failed"));
    assert!(h.driver.executed_on().is_empty());
}

#[tokio::test]
async fn test_delete_refused_while_in_flight() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().push_delay("m", Duration::from_millis(300)))
        .task(task(&[], &[]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let err = assert_err!(h.orchestrator.delete_run(&run.id).await);
    assert_eq!(err.kind(), "conflict");
    let err = assert_err!(h.orchestrator.delete_runs_by_task("task-1").await);
    assert_eq!(err.kind(), "conflict");

    h.wait_finished(&run.id).await;
    assert_ok!(h.orchestrator.delete_run(&run.id).await);
    let err = assert_err!(h.orchestrator.get_run(&run.id).await);
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_explicit_revision_is_deployed_each_time() {
    let h = HarnessBuilder::new().task(task(&["s1"], &[])).build().await;

    for _ in 0..2 {
        let options = RunOptions {
            revision: Some("42".to_string()),
        };
        let run = assert_ok!(h.orchestrator.start_run("task-1", options).await);
        let run = h.wait_finished(&run.id).await;
        assert_eq!(run.status, TaskStatus::Success);
        assert_eq!(run.revision.as_deref(), Some("42"));
    }

    assert_eq!(h.mirror.calls.load(Ordering::SeqCst), 2);
    let requests = h.mirror.requests.lock().unwrap().clone();
    assert_eq!(requests, vec![Some("42".to_string()), Some("42".to_string())]);
}

#[tokio::test]
async fn test_latest_resolves_same_revision_each_time() {
    let h = HarnessBuilder::new().task(task(&["s1"], &["./restart.sh"])).build().await;

    for _ in 0..2 {
        let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
        let run = h.wait_finished(&run.id).await;
        assert_eq!(run.status, TaskStatus::Success);
        assert_eq!(run.revision.as_deref(), Some(LATEST_REVISION));
        assert!(logged(&run, &format!("Fetched revision {}", LATEST_REVISION)));
    }

    assert_eq!(h.mirror.calls.load(Ordering::SeqCst), 2);
    let requests = h.mirror.requests.lock().unwrap().clone();
    assert_eq!(requests, vec![None, None]);

    let runs = h.store.list_runs(Some("task-1")).await;
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.revision.as_deref() == Some(LATEST_REVISION)));
}

#[tokio::test]
async fn test_finished_run_is_released_at_once() {
    let h = HarnessBuilder::new().task(task(&["s1"], &["./restart.sh"])).build().await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let run = h.wait_finished(&run.id).await;
    assert_eq!(run.status, TaskStatus::Success);

    // no settling time: a visible finishedAt means the run is no longer live
    assert!(!h.orchestrator.has_active_run("task-1").await);
    let next = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    assert_ok!(h.orchestrator.delete_run(&run.id).await);
    assert!(h.store.get_run(&run.id).await.is_none());

    let next = h.wait_finished(&next.id).await;
    assert_ok!(h.orchestrator.delete_runs_by_task("task-1").await);
    assert!(h.orchestrator.list_runs(Some("task-1")).await.is_empty());
    assert!(next.finished_at.is_some());
}

#[tokio::test]
async fn test_cancel_during_download_skips_every_node() {
    let h = HarnessBuilder::new()
        .mirror_delay(Duration::from_millis(300))
        .task(task(&["s1", "s2"], &["./restart.sh"]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = assert_ok!(h.orchestrator.cancel_run(&run.id).await);
    assert_eq!(cancelled.status, TaskStatus::Failed);

    let run = h.wait_finished(&run.id).await;
    assert_eq!(run.status, TaskStatus::Failed);
    assert!(run.progress < 100);
    for node in ["M", "S1", "S2"] {
        assert!(logged(&run, &format!("[{}] skipped: run cancelled", node)), "{}", node);
    }
    assert!(h.driver.pushed_to().is_empty());
    assert!(h.driver.executed_on().is_empty());
}

#[tokio::test]
async fn test_cancel_during_sync_skips_command_execution() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().push_delay("s1", Duration::from_millis(300)))
        .task(task(&["s1"], &["./restart.sh"]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    let syncing = async {
        while !h.driver.pushed_to().contains(&"m".to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    assert_ok!(tokio::time::timeout(Duration::from_secs(5), syncing).await);
    assert_ok!(h.orchestrator.cancel_run(&run.id).await);

    let run = h.wait_finished(&run.id).await;
    assert_eq!(run.status, TaskStatus::Failed);
    assert!(logged(&run, "[M] skipped: run cancelled"));
    assert!(logged(&run, "[S1] skipped: run cancelled"));
    assert!(h.driver.executed_on().is_empty());
}

#[tokio::test]
async fn test_cancel_skips_nodes_not_yet_dispatched() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().exec_delay("m", Duration::from_millis(400)))
        .worker_limit(1)
        .task(task(&["s1", "s2"], &["./restart.sh"]))
        .build()
        .await;

    let run = assert_ok!(h.orchestrator.start_run("task-1", RunOptions::default()).await);

    // wait for the master's command to be in progress
    let dispatched = async {
        while !h.driver.executed_on().contains(&"m".to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    assert_ok!(tokio::time::timeout(Duration::from_secs(5), dispatched).await);

    let cancelled = assert_ok!(h.orchestrator.cancel_run(&run.id).await);
    assert_eq!(cancelled.status, TaskStatus::Failed);

    let run = h.wait_finished(&run.id).await;
    assert_eq!(run.status, TaskStatus::Failed);
    assert!(logged(&run, "[S1] skipped: run cancelled"));
    assert!(logged(&run, "[S2] skipped: run cancelled"));
    assert_eq!(h.driver.executed_on(), vec!["m".to_string()]);

    // cancelling a finished run leaves it as it was
    let again = assert_ok!(h.orchestrator.cancel_run(&run.id).await);
    assert_eq!(again.logs.len(), run.logs.len());
}

#[tokio::test]
async fn test_missing_slave_rejected_before_run_exists() {
    let h = HarnessBuilder::new()
        .task(task(&["s1", "ghost"], &[]))
        .build()
        .await;

    let err = assert_err!(h.orchestrator.start_run("task-1", RunOptions::default()).await);
    assert_eq!(err.kind(), "not_found");
    assert!(h.store.list_runs(None).await.is_empty());
    assert!(!h.orchestrator.has_active_run("task-1").await);

    let err = assert_err!(h.orchestrator.start_run("task-404", RunOptions::default()).await);
    assert_eq!(err.kind(), "not_found");
}
