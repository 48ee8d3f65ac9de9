//! Task, template and run models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Run phase, also mirrored onto the task as its last known status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Idle,
    Downloading,
    Uploading,
    Syncing,
    Executing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "IDLE",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Uploading => "UPLOADING",
            TaskStatus::Syncing => "SYNCING",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment recipe: source resource, topology, remote paths, commands
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub svn_resource_id: String,
    pub master_server_id: String,
    #[serde(default)]
    pub slave_server_ids: Vec<String>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slave_remote_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slave_remote_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_run_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template_id: String,
}

/// Reusable factory for task definitions; never executed directly
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub svn_resource_id: String,
    pub master_server_id: String,
    #[serde(default)]
    pub slave_server_ids: Vec<String>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slave_remote_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slave_remote_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_task_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Partial update of a task or template; `None` keeps the stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub name: Option<String>,
    pub svn_resource_id: Option<String>,
    pub master_server_id: Option<String>,
    pub slave_server_ids: Option<Vec<String>>,
    pub remote_path: Option<String>,
    pub slave_remote_path: Option<String>,
    pub slave_remote_paths: Option<BTreeMap<String, String>>,
    pub commands: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn apply_to_task(self, task: &mut TaskDefinition) {
        if let Some(v) = self.name {
            task.name = v;
        }
        if let Some(v) = self.svn_resource_id {
            task.svn_resource_id = v;
        }
        if let Some(v) = self.master_server_id {
            task.master_server_id = v;
        }
        if let Some(v) = self.slave_server_ids {
            task.slave_server_ids = v;
        }
        if let Some(v) = self.remote_path {
            task.remote_path = v;
        }
        if let Some(v) = self.slave_remote_path {
            task.slave_remote_path = v;
        }
        if let Some(v) = self.slave_remote_paths {
            task.slave_remote_paths = v;
        }
        if let Some(v) = self.commands {
            task.commands = v;
        }
    }

    pub fn apply_to_template(self, tpl: &mut TaskTemplate) {
        if let Some(v) = self.name {
            tpl.name = v;
        }
        if let Some(v) = self.svn_resource_id {
            tpl.svn_resource_id = v;
        }
        if let Some(v) = self.master_server_id {
            tpl.master_server_id = v;
        }
        if let Some(v) = self.slave_server_ids {
            tpl.slave_server_ids = v;
        }
        if let Some(v) = self.remote_path {
            tpl.remote_path = v;
        }
        if let Some(v) = self.slave_remote_path {
            tpl.slave_remote_path = v;
        }
        if let Some(v) = self.slave_remote_paths {
            tpl.slave_remote_paths = v;
        }
        if let Some(v) = self.commands {
            tpl.commands = v;
        }
    }
}

impl TaskTemplate {
    /// Capture a task's recipe as a template
    pub fn from_task(task: &TaskDefinition, name: String) -> Self {
        Self {
            id: String::new(),
            name,
            svn_resource_id: task.svn_resource_id.clone(),
            master_server_id: task.master_server_id.clone(),
            slave_server_ids: task.slave_server_ids.clone(),
            remote_path: task.remote_path.clone(),
            slave_remote_path: task.slave_remote_path.clone(),
            slave_remote_paths: task.slave_remote_paths.clone(),
            commands: task.commands.clone(),
            source_task_id: task.id.clone(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    /// Stamp out a fresh task definition from this template
    pub fn instantiate(&self, name: String) -> TaskDefinition {
        TaskDefinition {
            name,
            svn_resource_id: self.svn_resource_id.clone(),
            master_server_id: self.master_server_id.clone(),
            slave_server_ids: self.slave_server_ids.clone(),
            remote_path: self.remote_path.clone(),
            slave_remote_path: self.slave_remote_path.clone(),
            slave_remote_paths: self.slave_remote_paths.clone(),
            commands: self.commands.clone(),
            template_id: self.id.clone(),
            ..Default::default()
        }
    }
}

/// History record of one orchestration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Push notification for a run update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub task_id: String,
    pub run_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    pub finished: bool,
}
