//! Task and template service tests

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use deploymaster::deploy::RunOptions;
use deploymaster::models::task::{TaskDefinition, TaskPatch, TaskStatus};
use deploymaster::store::TaskStore;
use deploymaster::tasks::TaskService;

use crate::fixtures::{task, Harness, HarnessBuilder, ScriptedDriver};

fn service(h: &Harness) -> TaskService {
    TaskService::new(
        h.store.clone(),
        h.nodes.clone(),
        h.resources.clone(),
        Arc::clone(&h.orchestrator),
    )
}

fn draft(slaves: &[&str]) -> TaskDefinition {
    TaskDefinition {
        id: String::new(),
        ..task(slaves, &["./restart.sh", "  "])
    }
}

#[tokio::test]
async fn test_create_normalizes_slaves() {
    let h = HarnessBuilder::new().build().await;
    let tasks = service(&h);

    let created = assert_ok!(tasks.create_task(draft(&["s1", " s2 ", "s1", ""])).await);
    assert!(created.id.starts_with("task-"));
    assert_eq!(created.slave_server_ids, vec!["s1".to_string(), "s2".to_string()]);
    assert_eq!(created.status, TaskStatus::Idle);
    assert!(!created.created_at.is_empty());

    assert_eq!(tasks.list_tasks().await.len(), 1);
}

#[tokio::test]
async fn test_create_rejects_bad_references() {
    let h = HarnessBuilder::new().build().await;
    let tasks = service(&h);

    let err = assert_err!(tasks.create_task(draft(&["m"])).await);
    assert_eq!(err.kind(), "validation");

    let err = assert_err!(tasks.create_task(draft(&["ghost"])).await);
    assert_eq!(err.kind(), "validation");

    let mut bad = draft(&[]);
    bad.svn_resource_id = "svn-404".to_string();
    let err = assert_err!(tasks.create_task(bad).await);
    assert_eq!(err.kind(), "validation");

    let mut unnamed = draft(&[]);
    unnamed.name = "  ".to_string();
    let err = assert_err!(tasks.create_task(unnamed).await);
    assert_eq!(err.kind(), "validation");

    assert!(tasks.list_tasks().await.is_empty());
}

#[tokio::test]
async fn test_update_keeps_omitted_fields() {
    let h = HarnessBuilder::new().build().await;
    let tasks = service(&h);
    let created = assert_ok!(tasks.create_task(draft(&["s1"])).await);

    let patch = TaskPatch {
        commands: Some(vec!["./migrate.sh".to_string()]),
        ..Default::default()
    };
    let updated = assert_ok!(tasks.update_task(&created.id, patch).await);
    assert_eq!(updated.commands, vec!["./migrate.sh".to_string()]);
    assert_eq!(updated.slave_server_ids, created.slave_server_ids);
    assert_eq!(updated.remote_path, created.remote_path);

    let err = assert_err!(tasks.update_task("task-404", TaskPatch::default()).await);
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_delete_cascades_run_history() {
    let h = HarnessBuilder::new()
        .driver(ScriptedDriver::new().push_delay("m", Duration::from_millis(300)))
        .build()
        .await;
    let tasks = service(&h);
    let created = assert_ok!(tasks.create_task(draft(&[])).await);

    let run = assert_ok!(h.orchestrator.start_run(&created.id, RunOptions::default()).await);
    let err = assert_err!(tasks.delete_task(&created.id).await);
    assert_eq!(err.kind(), "conflict");

    h.wait_finished(&run.id).await;
    assert_eq!(h.store.list_runs(Some(&created.id)).await.len(), 1);

    assert_ok!(tasks.delete_task(&created.id).await);
    assert!(h.store.list_runs(Some(&created.id)).await.is_empty());
    let err = assert_err!(tasks.delete_task(&created.id).await);
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_template_round_trip() {
    let h = HarnessBuilder::new().build().await;
    let tasks = service(&h);
    let created = assert_ok!(tasks.create_task(draft(&["s2"])).await);

    let template = assert_ok!(tasks.save_as_template(&created.id, None).await);
    assert!(template.id.starts_with("tpl-"));
    assert_eq!(template.name, "deploy app template");
    assert_eq!(template.source_task_id, created.id);

    let copy = assert_ok!(
        tasks
            .instantiate_template(&template.id, Some("deploy app (staging)".to_string()))
            .await
    );
    assert_ne!(copy.id, created.id);
    assert_eq!(copy.name, "deploy app (staging)");
    assert_eq!(copy.template_id, template.id);
    assert_eq!(copy.slave_server_ids, created.slave_server_ids);
    assert_eq!(copy.commands, created.commands);

    assert_ok!(tasks.delete_template(&template.id).await);
    let err = assert_err!(tasks.instantiate_template(&template.id, None).await);
    assert_eq!(err.kind(), "not_found");
    // tasks made from a template outlive it
    assert_ok!(tasks.get_task(&copy.id).await);
}
