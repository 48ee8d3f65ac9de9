//! JSON-backed SVN resource registry

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::resource::{ResourceStatus, SvnResource};
use crate::registry::ResourceRegistry;
use crate::utils::{generate_id, now_string, now_utc};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceCollection {
    #[serde(default)]
    resources: Vec<SvnResource>,
    #[serde(default)]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Resource registry persisted to `svn-resources.json`
pub struct JsonResourceRegistry {
    file: Option<File>,
    resources: RwLock<Vec<SvnResource>>,
}

impl JsonResourceRegistry {
    pub async fn load(file: File) -> Result<Self, DeployError> {
        let collection: ResourceCollection = file.read_json_or_default().await?;
        info!(
            "Loaded {} SVN resources from {}",
            collection.resources.len(),
            file.path().display()
        );
        Ok(Self {
            file: Some(file),
            resources: RwLock::new(collection.resources),
        })
    }

    pub fn in_memory(resources: Vec<SvnResource>) -> Self {
        Self {
            file: None,
            resources: RwLock::new(resources),
        }
    }

    async fn save(&self, resources: &[SvnResource]) -> Result<(), DeployError> {
        if let Some(file) = &self.file {
            let collection = ResourceCollection {
                resources: resources.to_vec(),
                updated_at: Some(now_utc()),
            };
            file.write_json(&collection).await?;
        }
        Ok(())
    }

    pub async fn add_resource(&self, mut resource: SvnResource) -> Result<SvnResource, DeployError> {
        if url::Url::parse(resource.url.trim()).is_err() {
            return Err(DeployError::ValidationError(format!(
                "invalid repository url: {}",
                resource.url
            )));
        }
        let mut resources = self.resources.write().await;
        if resource.id.is_empty() {
            resource.id = generate_id("svn");
        }
        if resources.iter().any(|r| r.id == resource.id) {
            return Err(DeployError::Conflict(format!(
                "resource {} already exists",
                resource.id
            )));
        }
        if resource.last_checked.is_empty() {
            resource.last_checked = now_string();
        }
        resource.status = ResourceStatus::Online;
        resources.insert(0, resource.clone());
        self.save(&resources).await?;
        Ok(resource)
    }

    pub async fn delete_resource(&self, id: &str) -> Result<SvnResource, DeployError> {
        let mut resources = self.resources.write().await;
        let idx = resources
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| DeployError::NotFound(format!("resource {}", id)))?;
        let removed = resources.remove(idx);
        self.save(&resources).await?;
        Ok(removed)
    }
}

#[async_trait]
impl ResourceRegistry for JsonResourceRegistry {
    async fn get_resource(&self, id: &str) -> Option<SvnResource> {
        self.resources.read().await.iter().find(|r| r.id == id).cloned()
    }

    async fn list_resources(&self) -> Vec<SvnResource> {
        self.resources.read().await.clone()
    }

    async fn update_resource(&self, resource: SvnResource) -> Result<(), DeployError> {
        let mut resources = self.resources.write().await;
        let slot = resources
            .iter_mut()
            .find(|r| r.id == resource.id)
            .ok_or_else(|| DeployError::NotFound(format!("resource {}", resource.id)))?;
        *slot = resource;
        self.save(&resources).await
    }
}
