//! Fakes for the engine's collaborators

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use deploymaster::deploy::{Collaborators, EngineConfig, Orchestrator};
use deploymaster::errors::DeployError;
use deploymaster::models::node::{AuthMethod, Node, Protocol};
use deploymaster::models::resource::{ResourceStatus, ResourceType, SvnResource};
use deploymaster::models::task::{TaskDefinition, TaskRun};
use deploymaster::registry::{JsonNodeRegistry, JsonResourceRegistry};
use deploymaster::store::{JsonTaskStore, TaskStore};
use deploymaster::svn::{SvnMirror, SyncOutcome};
use deploymaster::transfer::{CommandEvent, CommandStream, SessionAuth, TransferDriver};
use deploymaster::utils::generate_id;
use deploymaster::vault::FileVault;

pub const LATEST_REVISION: &str = "57";

/// Stages a one-file folder per call and counts requests
#[derive(Default)]
pub struct FakeMirror {
    pub requests: Mutex<Vec<Option<String>>>,
    pub calls: AtomicUsize,
    delay: Duration,
}

impl FakeMirror {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SvnMirror for FakeMirror {
    async fn sync(
        &self,
        _resource_id: &str,
        target_revision: Option<&str>,
        staging: &Path,
    ) -> Result<SyncOutcome, DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push(target_revision.map(str::to_string));
        tokio::time::sleep(self.delay).await;

        let revision = target_revision.unwrap_or(LATEST_REVISION).to_string();
        let artifact = staging.join("app");
        tokio::fs::create_dir_all(&artifact).await?;
        let body = format!("build {}", revision);
        tokio::fs::write(artifact.join("app.jar"), &body).await?;
        Ok(SyncOutcome {
            revision,
            size_bytes: body.len() as u64,
            artifact,
        })
    }
}

/// Transfer driver with per-node delays and failures
#[derive(Default)]
pub struct ScriptedDriver {
    push_delay: HashMap<String, Duration>,
    exec_delay: HashMap<String, Duration>,
    failing_push: HashSet<String>,
    exit_codes: HashMap<String, i32>,
    pub pushes: Mutex<Vec<(String, String)>>,
    pub execs: Mutex<Vec<(String, String)>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.push_delay.insert(node_id.to_string(), delay);
        self
    }

    pub fn exec_delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.exec_delay.insert(node_id.to_string(), delay);
        self
    }

    pub fn failing_push(mut self, node_id: &str) -> Self {
        self.failing_push.insert(node_id.to_string());
        self
    }

    pub fn exit_code(mut self, node_id: &str, code: i32) -> Self {
        self.exit_codes.insert(node_id.to_string(), code);
        self
    }

    pub fn pushed_to(&self) -> Vec<String> {
        self.pushes.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn executed_on(&self) -> Vec<String> {
        self.execs.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }
}

#[async_trait]
impl TransferDriver for ScriptedDriver {
    async fn push(&self, node: &Node, _local: &Path, remote: &str, _auth: &SessionAuth) -> Result<(), DeployError> {
        if let Some(delay) = self.push_delay.get(&node.id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_push.contains(&node.id) {
            return Err(DeployError::TransportError(format!("connection to {} refused", node.ip)));
        }
        self.pushes
            .lock()
            .unwrap()
            .push((node.id.clone(), remote.to_string()));
        Ok(())
    }

    async fn exec(
        &self,
        node: &Node,
        _workdir: &str,
        command: &str,
        _auth: &SessionAuth,
    ) -> Result<CommandStream, DeployError> {
        self.execs
            .lock()
            .unwrap()
            .push((node.id.clone(), command.to_string()));
        if let Some(delay) = self.exec_delay.get(&node.id) {
            tokio::time::sleep(*delay).await;
        }
        let code = self.exit_codes.get(&node.id).copied().unwrap_or(0);
        let events = vec![
            Ok(CommandEvent::Stdout(format!("ran {}", command))),
            Ok(CommandEvent::Exit(code)),
        ];
        Ok(futures::stream::iter(events).boxed())
    }
}

pub fn node(id: &str, name: &str, is_master: bool) -> Node {
    Node {
        id: id.to_string(),
        name: name.to_string(),
        ip: format!("10.0.0.{}", id.len()),
        port: 22,
        protocol: Protocol::Sftp,
        is_master,
        username: "deploy".to_string(),
        auth_method: AuthMethod::Agent,
        key_path: String::new(),
    }
}

pub fn resource() -> SvnResource {
    SvnResource {
        id: "svn-1".to_string(),
        url: "svn://repo.local/app/trunk".to_string(),
        name: "app".to_string(),
        resource_type: ResourceType::Folder,
        revision: String::new(),
        status: ResourceStatus::Online,
        last_checked: String::new(),
        size: String::new(),
        username: String::new(),
    }
}

pub fn task(slaves: &[&str], commands: &[&str]) -> TaskDefinition {
    TaskDefinition {
        id: "task-1".to_string(),
        name: "deploy app".to_string(),
        svn_resource_id: "svn-1".to_string(),
        master_server_id: "m".to_string(),
        slave_server_ids: slaves.iter().map(|s| s.to_string()).collect(),
        remote_path: "/opt/app".to_string(),
        commands: commands.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    }
}

pub fn nodes() -> Arc<JsonNodeRegistry> {
    Arc::new(JsonNodeRegistry::in_memory(vec![
        node("m", "M", true),
        node("s1", "S1", false),
        node("s2", "S2", false),
    ]))
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<JsonTaskStore>,
    pub nodes: Arc<JsonNodeRegistry>,
    pub resources: Arc<JsonResourceRegistry>,
    pub mirror: Arc<FakeMirror>,
    pub driver: Arc<ScriptedDriver>,
    pub staging_root: PathBuf,
}

pub struct HarnessBuilder {
    driver: ScriptedDriver,
    mirror_delay: Duration,
    worker_limit: usize,
    node_timeout: Duration,
    tasks: Vec<TaskDefinition>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            driver: ScriptedDriver::new(),
            mirror_delay: Duration::ZERO,
            worker_limit: 4,
            node_timeout: Duration::from_secs(5),
            tasks: Vec::new(),
        }
    }

    pub fn driver(mut self, driver: ScriptedDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn mirror_delay(mut self, delay: Duration) -> Self {
        self.mirror_delay = delay;
        self
    }

    pub fn worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit;
        self
    }

    pub fn node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub async fn build(self) -> Harness {
        let store = Arc::new(JsonTaskStore::in_memory());
        for task in self.tasks {
            store.save_task(task).await.unwrap();
        }
        let nodes = nodes();
        let resources = Arc::new(JsonResourceRegistry::in_memory(vec![resource()]));
        let mirror = Arc::new(FakeMirror::with_delay(self.mirror_delay));
        let driver = Arc::new(self.driver);
        let staging_root = std::env::temp_dir().join(generate_id("dm-staging"));

        let orchestrator = Arc::new(Orchestrator::new(
            EngineConfig {
                worker_limit: self.worker_limit,
                node_timeout: self.node_timeout,
                default_remote_path: "/tmp/deploymaster".to_string(),
                staging_root: staging_root.clone(),
            },
            Collaborators {
                store: store.clone(),
                nodes: nodes.clone(),
                resources: resources.clone(),
                mirror: mirror.clone(),
                driver: driver.clone(),
                vault: Arc::new(FileVault::in_memory()),
            },
        ));

        Harness {
            orchestrator,
            store,
            nodes,
            resources,
            mirror,
            driver,
            staging_root,
        }
    }
}

impl Harness {
    /// Poll `get_run` until the run has a finish timestamp
    pub async fn wait_finished(&self, run_id: &str) -> TaskRun {
        let wait = async {
            loop {
                let run = self.orchestrator.get_run(run_id).await.unwrap();
                if run.finished_at.is_some() {
                    return run;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("run did not finish in time")
    }
}

/// True when some log line contains `needle`
pub fn logged(run: &TaskRun, needle: &str) -> bool {
    run.logs.iter().any(|line| line.contains(needle))
}
