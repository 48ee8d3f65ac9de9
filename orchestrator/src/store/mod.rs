//! Persistence of task definitions, templates and run history

pub mod json;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::task::{TaskDefinition, TaskRun, TaskStatus, TaskTemplate};

pub use json::JsonTaskStore;

/// Storage for tasks, templates and runs. Lists are newest-first.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_tasks(&self) -> Vec<TaskDefinition>;

    async fn get_task(&self, id: &str) -> Option<TaskDefinition>;

    /// Insert a new task at the front, or replace the one with the same id
    async fn save_task(&self, task: TaskDefinition) -> Result<(), DeployError>;

    /// Remove a task together with its run history
    async fn delete_task(&self, id: &str) -> Result<bool, DeployError>;

    /// Mirror a run's status onto its task in place, leaving every other
    /// field as stored. Returns false when the task no longer exists.
    async fn record_run_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: u8,
        last_run_at: &str,
    ) -> Result<bool, DeployError>;

    async fn list_templates(&self) -> Vec<TaskTemplate>;

    async fn get_template(&self, id: &str) -> Option<TaskTemplate>;

    async fn save_template(&self, template: TaskTemplate) -> Result<(), DeployError>;

    async fn delete_template(&self, id: &str) -> Result<bool, DeployError>;

    /// Runs of one task, or of all tasks when `task_id` is `None`
    async fn list_runs(&self, task_id: Option<&str>) -> Vec<TaskRun>;

    async fn get_run(&self, id: &str) -> Option<TaskRun>;

    async fn save_run(&self, run: TaskRun) -> Result<(), DeployError>;

    async fn delete_run(&self, id: &str) -> Result<bool, DeployError>;

    /// Returns the number of runs removed
    async fn delete_runs_by_task(&self, task_id: &str) -> Result<usize, DeployError>;
}
