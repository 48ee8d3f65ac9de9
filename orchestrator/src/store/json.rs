//! JSON document store (`tasks.json`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::task::{TaskDefinition, TaskRun, TaskStatus, TaskTemplate};
use crate::store::TaskStore;
use crate::utils::{now_string, now_utc};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDocument {
    #[serde(default)]
    tasks: Vec<TaskDefinition>,
    #[serde(default)]
    templates: Vec<TaskTemplate>,
    #[serde(default)]
    runs: Vec<TaskRun>,
    #[serde(default)]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Tasks, templates and runs kept in memory and rewritten atomically to one
/// file on every mutation
pub struct JsonTaskStore {
    file: Option<File>,
    doc: RwLock<TaskDocument>,
}

impl JsonTaskStore {
    pub async fn load(file: File) -> Result<Self, DeployError> {
        let doc: TaskDocument = file.read_json_or_default().await?;
        info!(
            "Loaded {} tasks, {} templates, {} runs from {}",
            doc.tasks.len(),
            doc.templates.len(),
            doc.runs.len(),
            file.path().display()
        );
        Ok(Self {
            file: Some(file),
            doc: RwLock::new(doc),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            file: None,
            doc: RwLock::new(TaskDocument::default()),
        }
    }

    async fn persist(&self, doc: &mut TaskDocument) -> Result<(), DeployError> {
        if let Some(file) = &self.file {
            doc.updated_at = Some(now_utc());
            file.write_json(&*doc).await?;
        }
        Ok(())
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match items.iter().position(same) {
        Some(idx) => items[idx] = item,
        None => items.insert(0, item),
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn list_tasks(&self) -> Vec<TaskDefinition> {
        self.doc.read().await.tasks.clone()
    }

    async fn get_task(&self, id: &str) -> Option<TaskDefinition> {
        self.doc.read().await.tasks.iter().find(|t| t.id == id).cloned()
    }

    async fn save_task(&self, task: TaskDefinition) -> Result<(), DeployError> {
        let mut doc = self.doc.write().await;
        let id = task.id.clone();
        upsert(&mut doc.tasks, task, |t| t.id == id);
        self.persist(&mut doc).await
    }

    async fn delete_task(&self, id: &str) -> Result<bool, DeployError> {
        let mut doc = self.doc.write().await;
        let before = doc.tasks.len();
        doc.tasks.retain(|t| t.id != id);
        if doc.tasks.len() == before {
            return Ok(false);
        }
        doc.runs.retain(|r| r.task_id != id);
        self.persist(&mut doc).await?;
        Ok(true)
    }

    async fn record_run_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: u8,
        last_run_at: &str,
    ) -> Result<bool, DeployError> {
        let mut doc = self.doc.write().await;
        let Some(task) = doc.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(false);
        };
        task.status = status;
        task.progress = progress;
        task.last_run_at = last_run_at.to_string();
        task.updated_at = now_string();
        self.persist(&mut doc).await?;
        Ok(true)
    }

    async fn list_templates(&self) -> Vec<TaskTemplate> {
        self.doc.read().await.templates.clone()
    }

    async fn get_template(&self, id: &str) -> Option<TaskTemplate> {
        self.doc.read().await.templates.iter().find(|t| t.id == id).cloned()
    }

    async fn save_template(&self, template: TaskTemplate) -> Result<(), DeployError> {
        let mut doc = self.doc.write().await;
        let id = template.id.clone();
        upsert(&mut doc.templates, template, |t| t.id == id);
        self.persist(&mut doc).await
    }

    async fn delete_template(&self, id: &str) -> Result<bool, DeployError> {
        let mut doc = self.doc.write().await;
        let before = doc.templates.len();
        doc.templates.retain(|t| t.id != id);
        if doc.templates.len() == before {
            return Ok(false);
        }
        self.persist(&mut doc).await?;
        Ok(true)
    }

    async fn list_runs(&self, task_id: Option<&str>) -> Vec<TaskRun> {
        let doc = self.doc.read().await;
        doc.runs
            .iter()
            .filter(|r| task_id.map_or(true, |id| r.task_id == id))
            .cloned()
            .collect()
    }

    async fn get_run(&self, id: &str) -> Option<TaskRun> {
        self.doc.read().await.runs.iter().find(|r| r.id == id).cloned()
    }

    async fn save_run(&self, run: TaskRun) -> Result<(), DeployError> {
        let mut doc = self.doc.write().await;
        let id = run.id.clone();
        upsert(&mut doc.runs, run, |r| r.id == id);
        self.persist(&mut doc).await
    }

    async fn delete_run(&self, id: &str) -> Result<bool, DeployError> {
        let mut doc = self.doc.write().await;
        let before = doc.runs.len();
        doc.runs.retain(|r| r.id != id);
        if doc.runs.len() == before {
            return Ok(false);
        }
        self.persist(&mut doc).await?;
        Ok(true)
    }

    async fn delete_runs_by_task(&self, task_id: &str) -> Result<usize, DeployError> {
        let mut doc = self.doc.write().await;
        let before = doc.runs.len();
        doc.runs.retain(|r| r.task_id != task_id);
        let removed = before - doc.runs.len();
        if removed > 0 {
            self.persist(&mut doc).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesys::dir::Dir;

    fn run(id: &str, task_id: &str) -> TaskRun {
        TaskRun {
            id: id.into(),
            task_id: task_id.into(),
            task_name: "deploy".into(),
            status: TaskStatus::Success,
            progress: 100,
            started_at: "2026-01-01 10:00:00".into(),
            finished_at: Some("2026-01-01 10:01:00".into()),
            revision: Some("42".into()),
            logs: vec![],
        }
    }

    #[tokio::test]
    async fn test_runs_newest_first_and_upsert() {
        let store = JsonTaskStore::in_memory();
        store.save_run(run("r1", "t1")).await.unwrap();
        store.save_run(run("r2", "t1")).await.unwrap();
        store.save_run(run("r3", "t2")).await.unwrap();

        let ids: Vec<String> = store.list_runs(Some("t1")).await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r2", "r1"]);

        let mut updated = run("r1", "t1");
        updated.progress = 40;
        store.save_run(updated).await.unwrap();
        assert_eq!(store.list_runs(None).await.len(), 3);
        assert_eq!(store.get_run("r1").await.unwrap().progress, 40);
    }

    #[tokio::test]
    async fn test_delete_task_cascades_runs_and_persists() {
        let dir = Dir::create_temp_dir("dm-store").await.unwrap();
        let file = dir.file("tasks.json");

        let store = JsonTaskStore::load(file.clone()).await.unwrap();
        store
            .save_task(TaskDefinition {
                id: "t1".into(),
                name: "deploy".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.save_run(run("r1", "t1")).await.unwrap();
        store.save_run(run("r2", "t2")).await.unwrap();
        assert!(store.delete_task("t1").await.unwrap());
        assert!(!store.delete_task("t1").await.unwrap());

        let reloaded = JsonTaskStore::load(file).await.unwrap();
        assert!(reloaded.get_task("t1").await.is_none());
        assert_eq!(reloaded.list_runs(None).await.len(), 1);

        dir.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_status_keeps_concurrent_edits() {
        let store = JsonTaskStore::in_memory();
        let original = TaskDefinition {
            id: "t1".into(),
            name: "deploy".into(),
            commands: vec!["./start.sh".into()],
            ..Default::default()
        };
        store.save_task(original.clone()).await.unwrap();

        // an edit saved after a run began must survive the status mirror
        let mut edited = original;
        edited.name = "deploy v2".into();
        edited.commands = vec!["./stop.sh".into(), "./start.sh".into()];
        store.save_task(edited).await.unwrap();

        assert!(store
            .record_run_status("t1", TaskStatus::Executing, 80, "2026-01-01 10:00:00")
            .await
            .unwrap());

        let task = store.get_task("t1").await.unwrap();
        assert_eq!(task.name, "deploy v2");
        assert_eq!(task.commands.len(), 2);
        assert_eq!(task.status, TaskStatus::Executing);
        assert_eq!(task.progress, 80);
        assert_eq!(task.last_run_at, "2026-01-01 10:00:00");

        assert!(!store
            .record_run_status("gone", TaskStatus::Failed, 10, "x")
            .await
            .unwrap());
        assert!(store.get_task("gone").await.is_none());
    }
}
