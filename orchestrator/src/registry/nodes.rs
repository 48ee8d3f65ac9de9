//! JSON-backed node registry

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::node::{Node, Topology};
use crate::registry::NodeRegistry;
use crate::utils::{generate_id, now_utc};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeCollection {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Node registry persisted to `nodes.json`
pub struct JsonNodeRegistry {
    file: Option<File>,
    nodes: RwLock<Vec<Node>>,
}

impl JsonNodeRegistry {
    /// Load the registry from disk; a missing file starts empty
    pub async fn load(file: File) -> Result<Self, DeployError> {
        let collection: NodeCollection = file.read_json_or_default().await?;
        info!("Loaded {} nodes from {}", collection.nodes.len(), file.path().display());
        Ok(Self {
            file: Some(file),
            nodes: RwLock::new(collection.nodes),
        })
    }

    /// Registry that never touches disk
    pub fn in_memory(nodes: Vec<Node>) -> Self {
        Self {
            file: None,
            nodes: RwLock::new(nodes),
        }
    }

    async fn save(&self, nodes: &[Node]) -> Result<(), DeployError> {
        if let Some(file) = &self.file {
            let collection = NodeCollection {
                nodes: nodes.to_vec(),
                updated_at: Some(now_utc()),
            };
            file.write_json(&collection).await?;
        }
        Ok(())
    }

    fn validate(node: &Node) -> Result<(), DeployError> {
        if node.ip.trim().is_empty() {
            return Err(DeployError::ValidationError("node ip is required".to_string()));
        }
        if node.port == 0 {
            return Err(DeployError::ValidationError("node port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Register a node; a new master demotes the previous one
    pub async fn add_node(&self, mut node: Node) -> Result<Node, DeployError> {
        Self::validate(&node)?;
        let mut nodes = self.nodes.write().await;
        if node.id.is_empty() {
            node.id = generate_id("node");
        }
        if nodes.iter().any(|n| n.id == node.id) {
            return Err(DeployError::Conflict(format!("node {} already exists", node.id)));
        }
        if node.is_master {
            nodes.iter_mut().for_each(|n| n.is_master = false);
        }
        nodes.push(node.clone());
        self.save(&nodes).await?;
        Ok(node)
    }

    pub async fn update_node(&self, node: Node) -> Result<(), DeployError> {
        Self::validate(&node)?;
        let mut nodes = self.nodes.write().await;
        let idx = nodes
            .iter()
            .position(|n| n.id == node.id)
            .ok_or_else(|| DeployError::NotFound(format!("node {}", node.id)))?;
        if node.is_master {
            nodes.iter_mut().for_each(|n| n.is_master = false);
        }
        nodes[idx] = node;
        self.save(&nodes).await
    }

    /// Remove a node. Stored credentials are left alone; callers clear them
    /// through the vault.
    pub async fn delete_node(&self, id: &str) -> Result<Node, DeployError> {
        let mut nodes = self.nodes.write().await;
        let idx = nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| DeployError::NotFound(format!("node {}", id)))?;
        let removed = nodes.remove(idx);
        self.save(&nodes).await?;
        Ok(removed)
    }

    pub async fn topology(&self) -> Topology {
        let nodes = self.nodes.read().await;
        let master = nodes.iter().find(|n| n.is_master).cloned();
        let slaves: Vec<Node> = nodes.iter().filter(|n| !n.is_master).cloned().collect();
        Topology {
            total: nodes.len(),
            master,
            slaves,
        }
    }
}

#[async_trait]
impl NodeRegistry for JsonNodeRegistry {
    async fn get_node(&self, id: &str) -> Option<Node> {
        self.nodes.read().await.iter().find(|n| n.id == id).cloned()
    }

    async fn list_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesys::dir::Dir;
    use crate::models::node::{AuthMethod, Protocol};

    fn node(id: &str, is_master: bool) -> Node {
        Node {
            id: id.to_string(),
            name: id.to_string(),
            ip: "10.0.0.1".to_string(),
            port: 22,
            protocol: Protocol::Sftp,
            is_master,
            username: "deploy".to_string(),
            auth_method: AuthMethod::Password,
            key_path: String::new(),
        }
    }

    #[tokio::test]
    async fn test_single_master_in_registry() {
        let registry = JsonNodeRegistry::in_memory(vec![node("a", true)]);
        registry.add_node(node("b", true)).await.unwrap();

        let topology = registry.topology().await;
        assert_eq!(topology.master.unwrap().id, "b");
        assert_eq!(topology.slaves.len(), 1);
        assert_eq!(topology.total, 2);
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let dir = Dir::create_temp_dir("dm-nodes").await.unwrap();
        let file = dir.file("nodes.json");

        let registry = JsonNodeRegistry::load(file.clone()).await.unwrap();
        let added = registry.add_node(node("", false)).await.unwrap();
        assert!(added.id.starts_with("node-"));

        let reloaded = JsonNodeRegistry::load(file).await.unwrap();
        assert_eq!(reloaded.get_node(&added.id).await, Some(added));

        dir.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_node() {
        let registry = JsonNodeRegistry::in_memory(vec![]);
        let err = registry.delete_node("ghost").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
