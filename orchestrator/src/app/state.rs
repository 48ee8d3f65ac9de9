//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::cache::NodeStatusCache;
use crate::deploy::{Collaborators, Orchestrator};
use crate::errors::DeployError;
use crate::probe::SshProbe;
use crate::registry::{JsonNodeRegistry, JsonResourceRegistry};
use crate::store::JsonTaskStore;
use crate::svn::SvnCli;
use crate::tasks::TaskService;
use crate::transfer::OpenSshDriver;
use crate::vault::FileVault;

/// Main application state
pub struct AppState {
    pub nodes: Arc<JsonNodeRegistry>,
    pub resources: Arc<JsonResourceRegistry>,
    pub vault: Arc<FileVault>,
    pub store: Arc<JsonTaskStore>,
    pub svn: Arc<SvnCli>,
    pub driver: Arc<OpenSshDriver>,
    pub probe: Arc<SshProbe>,
    pub orchestrator: Arc<Orchestrator>,
    pub tasks: Arc<TaskService>,
    pub node_status: Arc<NodeStatusCache>,
}

impl AppState {
    /// Load every document under the data directory and wire the engine
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");
        let layout = &options.layout;
        layout.setup().await?;

        let nodes = Arc::new(JsonNodeRegistry::load(layout.nodes_file()).await?);
        let resources = Arc::new(JsonResourceRegistry::load(layout.resources_file()).await?);
        let vault = Arc::new(FileVault::load(layout.credentials_file(), layout.vault_key_file()).await?);
        let store = Arc::new(JsonTaskStore::load(layout.tasks_file()).await?);

        let svn = Arc::new(SvnCli::new(
            options.engine.svn_binary.clone(),
            Duration::from_secs(options.engine.svn_timeout_secs),
            resources.clone(),
            vault.clone(),
        ));
        if !svn.check_available().await {
            warn!(
                "svn client `{}` not found; runs will fail at DOWNLOADING",
                options.engine.svn_binary
            );
        }
        let driver = Arc::new(OpenSshDriver::from_settings(&options.engine));
        let probe = Arc::new(SshProbe::new(
            driver.clone(),
            vault.clone(),
            Duration::from_secs(options.engine.connect_timeout_secs),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            options.engine_config(),
            Collaborators {
                store: store.clone(),
                nodes: nodes.clone(),
                resources: resources.clone(),
                mirror: svn.clone(),
                driver: driver.clone(),
                vault: vault.clone(),
            },
        ));
        let tasks = Arc::new(TaskService::new(
            store.clone(),
            nodes.clone(),
            resources.clone(),
            orchestrator.clone(),
        ));

        Ok(Self {
            nodes,
            resources,
            vault,
            store,
            svn,
            driver,
            probe,
            orchestrator,
            tasks,
            node_status: Arc::new(NodeStatusCache::new()),
        })
    }

    /// Cancel in-flight runs and give them `drain` to record their outcome
    pub async fn shutdown(&self, drain: Duration) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        let cancelled = self.orchestrator.cancel_all().await;
        if cancelled > 0 {
            info!("Cancelled {} in-flight runs", cancelled);
        }
        if !self.orchestrator.wait_idle(drain).await {
            warn!("Runs still in flight after {:?}", drain);
        }
        Ok(())
    }
}
