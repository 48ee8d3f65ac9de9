//! Node and SVN resource registries
//!
//! The engine only reads through the traits; the JSON-backed registries
//! carry the CRUD used by the HTTP layer.

pub mod nodes;
pub mod resources;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::node::Node;
use crate::models::resource::SvnResource;

pub use nodes::JsonNodeRegistry;
pub use resources::JsonResourceRegistry;

/// Read access to deployment targets
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn get_node(&self, id: &str) -> Option<Node>;

    async fn list_nodes(&self) -> Vec<Node>;
}

/// Access to SVN resources; the mirror writes status and revision back
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn get_resource(&self, id: &str) -> Option<SvnResource>;

    async fn list_resources(&self) -> Vec<SvnResource>;

    async fn update_resource(&self, resource: SvnResource) -> Result<(), DeployError>;
}
