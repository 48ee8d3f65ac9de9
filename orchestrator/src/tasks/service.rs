//! Task definition and template CRUD with validation

use std::sync::Arc;

use tracing::info;

use crate::deploy::Orchestrator;
use crate::errors::DeployError;
use crate::models::task::{TaskDefinition, TaskPatch, TaskStatus, TaskTemplate};
use crate::registry::{NodeRegistry, ResourceRegistry};
use crate::store::TaskStore;
use crate::utils::{generate_id, now_string};

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    nodes: Arc<dyn NodeRegistry>,
    resources: Arc<dyn ResourceRegistry>,
    orchestrator: Arc<Orchestrator>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        nodes: Arc<dyn NodeRegistry>,
        resources: Arc<dyn ResourceRegistry>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            store,
            nodes,
            resources,
            orchestrator,
        }
    }

    /// Check references and normalize the slave list (trimmed, de-duplicated
    /// in first-seen order)
    async fn validate(
        &self,
        name: &str,
        resource_id: &str,
        master_id: &str,
        slave_ids: &mut Vec<String>,
    ) -> Result<(), DeployError> {
        if name.trim().is_empty() {
            return Err(DeployError::ValidationError("name is required".to_string()));
        }
        if self.resources.get_resource(resource_id).await.is_none() {
            return Err(DeployError::ValidationError(format!(
                "svn resource {} does not exist",
                resource_id
            )));
        }
        if self.nodes.get_node(master_id).await.is_none() {
            return Err(DeployError::ValidationError(format!(
                "master node {} does not exist",
                master_id
            )));
        }

        let mut seen: Vec<String> = Vec::with_capacity(slave_ids.len());
        for id in slave_ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if id == master_id {
                return Err(DeployError::ValidationError(format!(
                    "master node {} cannot also be a slave",
                    id
                )));
            }
            if seen.iter().any(|s| s == id) {
                continue;
            }
            if self.nodes.get_node(id).await.is_none() {
                return Err(DeployError::ValidationError(format!("slave node {} does not exist", id)));
            }
            seen.push(id.to_string());
        }
        *slave_ids = seen;
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<TaskDefinition> {
        self.store.list_tasks().await
    }

    pub async fn get_task(&self, id: &str) -> Result<TaskDefinition, DeployError> {
        self.store
            .get_task(id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("task {}", id)))
    }

    pub async fn create_task(&self, mut task: TaskDefinition) -> Result<TaskDefinition, DeployError> {
        self.validate(
            &task.name,
            &task.svn_resource_id,
            &task.master_server_id,
            &mut task.slave_server_ids,
        )
        .await?;

        task.id = generate_id("task");
        task.name = task.name.trim().to_string();
        task.status = TaskStatus::Idle;
        task.progress = 0;
        task.last_run_at = String::new();
        task.created_at = now_string();
        task.updated_at = task.created_at.clone();

        self.store.save_task(task.clone()).await?;
        info!(task_id = %task.id, "Created task {}", task.name);
        Ok(task)
    }

    /// Apply a partial update; omitted fields keep their stored value.
    /// An in-flight run keeps the definition it started with.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<TaskDefinition, DeployError> {
        let mut task = self.get_task(id).await?;
        patch.apply_to_task(&mut task);
        self.validate(
            &task.name,
            &task.svn_resource_id,
            &task.master_server_id,
            &mut task.slave_server_ids,
        )
        .await?;
        task.updated_at = now_string();

        self.store.save_task(task.clone()).await?;
        info!(task_id = %task.id, "Updated task {}", task.name);
        Ok(task)
    }

    /// Delete a task and its run history; refused while it has a run in
    /// flight
    pub async fn delete_task(&self, id: &str) -> Result<(), DeployError> {
        self.orchestrator.delete_task(id).await
    }

    pub async fn list_templates(&self) -> Vec<TaskTemplate> {
        self.store.list_templates().await
    }

    pub async fn get_template(&self, id: &str) -> Result<TaskTemplate, DeployError> {
        self.store
            .get_template(id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("template {}", id)))
    }

    pub async fn create_template(&self, mut template: TaskTemplate) -> Result<TaskTemplate, DeployError> {
        self.validate(
            &template.name,
            &template.svn_resource_id,
            &template.master_server_id,
            &mut template.slave_server_ids,
        )
        .await?;

        template.id = generate_id("tpl");
        template.name = template.name.trim().to_string();
        template.created_at = now_string();
        template.updated_at = template.created_at.clone();

        self.store.save_template(template.clone()).await?;
        info!(template_id = %template.id, "Created template {}", template.name);
        Ok(template)
    }

    pub async fn update_template(&self, id: &str, patch: TaskPatch) -> Result<TaskTemplate, DeployError> {
        let mut template = self.get_template(id).await?;
        patch.apply_to_template(&mut template);
        self.validate(
            &template.name,
            &template.svn_resource_id,
            &template.master_server_id,
            &mut template.slave_server_ids,
        )
        .await?;
        template.updated_at = now_string();

        self.store.save_template(template.clone()).await?;
        Ok(template)
    }

    pub async fn delete_template(&self, id: &str) -> Result<(), DeployError> {
        if !self.store.delete_template(id).await? {
            return Err(DeployError::NotFound(format!("template {}", id)));
        }
        info!(template_id = %id, "Deleted template");
        Ok(())
    }

    /// Capture a task's recipe as a new template
    pub async fn save_as_template(&self, task_id: &str, name: Option<String>) -> Result<TaskTemplate, DeployError> {
        let task = self.get_task(task_id).await?;
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{} template", task.name));
        self.create_template(TaskTemplate::from_task(&task, name)).await
    }

    /// Create a task from a template
    pub async fn instantiate_template(
        &self,
        template_id: &str,
        name: Option<String>,
    ) -> Result<TaskDefinition, DeployError> {
        let template = self.get_template(template_id).await?;
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| template.name.clone());
        self.create_task(template.instantiate(name)).await
    }
}
