//! Deployment orchestrator
//!
//! Drives runs through DOWNLOADING → UPLOADING → SYNCING → EXECUTING. Each
//! run executes on its own tokio task; at most one run per task definition
//! is in flight at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{error, info, warn};

use crate::deploy::fsm::PhaseEvent;
use crate::deploy::node_runner::NodeRunner;
use crate::deploy::paths::{master_path, push_target, resolve_slave_path};
use crate::deploy::progress::{band, PhaseCounter};
use crate::deploy::recorder::RunRecorder;
use crate::errors::DeployError;
use crate::filesys::dir::{tree_digest, Dir};
use crate::models::node::Node;
use crate::models::resource::{ResourceType, SvnResource};
use crate::models::task::{RunEvent, TaskDefinition, TaskRun, TaskStatus};
use crate::registry::{NodeRegistry, ResourceRegistry};
use crate::storage::settings::EngineSettings;
use crate::store::TaskStore;
use crate::svn::SvnMirror;
use crate::transfer::TransferDriver;
use crate::utils::{generate_id, human_size, now_string};
use crate::vault::CredentialVault;

/// Capacity of the run event channel
const EVENT_BUFFER: usize = 1024;

/// Engine settings in runtime form
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_limit: usize,
    pub node_timeout: Duration,
    pub default_remote_path: String,
    /// Per-run staging directories are created below this root
    pub staging_root: PathBuf,
}

impl EngineConfig {
    pub fn from_settings(engine: &EngineSettings, staging_root: PathBuf) -> Self {
        Self {
            worker_limit: engine.worker_limit.max(1),
            node_timeout: Duration::from_secs(engine.node_timeout_secs),
            default_remote_path: engine.default_remote_path.clone(),
            staging_root,
        }
    }
}

/// Everything the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub nodes: Arc<dyn NodeRegistry>,
    pub resources: Arc<dyn ResourceRegistry>,
    pub mirror: Arc<dyn SvnMirror>,
    pub driver: Arc<dyn TransferDriver>,
    pub vault: Arc<dyn CredentialVault>,
}

/// Per-invocation options for [`Orchestrator::start_run`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Revision to deploy; latest when `None`
    pub revision: Option<String>,
}

struct LiveRun {
    task_id: String,
    recorder: Arc<RunRecorder>,
}

type LiveRuns = Arc<RwLock<HashMap<String, LiveRun>>>;

/// Snapshot of everything a run needs, resolved at start
struct RunPlan {
    task: TaskDefinition,
    resource: SvnResource,
    master: Node,
    master_dir: String,
    /// Slaves in task order, each with its resolved directory
    slaves: Vec<(Node, String)>,
    commands: Vec<String>,
    revision: Option<String>,
    staging: PathBuf,
}

pub struct Orchestrator {
    config: Arc<EngineConfig>,
    deps: Collaborators,
    live: LiveRuns,
    events: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, deps: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config: Arc::new(config),
            deps,
            live: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Receive every run update from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Start a run of `task_id` in the background and return its record.
    ///
    /// Fails with `Conflict` while another run of the task is in flight and
    /// with `NotFound` when the task, its resource or any of its nodes is
    /// gone.
    pub async fn start_run(&self, task_id: &str, options: RunOptions) -> Result<TaskRun, DeployError> {
        // read under the lock so a concurrent delete_task cannot slip in
        let mut live = self.live.write().await;
        let task = self
            .deps
            .store
            .get_task(task_id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("task {}", task_id)))?;

        if let Some((run_id, _)) = live.iter().find(|(_, r)| r.task_id == task.id) {
            return Err(DeployError::Conflict(format!(
                "task {} already has run {} in flight",
                task.id, run_id
            )));
        }

        let run_id = generate_id("run");
        let plan = self.plan(task, &run_id, options).await?;

        let run = TaskRun {
            id: run_id.clone(),
            task_id: plan.task.id.clone(),
            task_name: plan.task.name.clone(),
            status: TaskStatus::Idle,
            progress: 0,
            started_at: now_string(),
            finished_at: None,
            revision: None,
            logs: Vec::new(),
        };
        self.deps.store.save_run(run.clone()).await?;

        let recorder = Arc::new(RunRecorder::new(
            run.clone(),
            Arc::clone(&self.deps.store),
            self.events.clone(),
        ));
        live.insert(
            run_id.clone(),
            LiveRun {
                task_id: run.task_id.clone(),
                recorder: Arc::clone(&recorder),
            },
        );
        drop(live);

        info!(run_id = %run_id, task_id = %run.task_id, "Starting run of {}", run.task_name);
        self.spawn(plan, recorder);
        Ok(run)
    }

    async fn plan(&self, task: TaskDefinition, run_id: &str, options: RunOptions) -> Result<RunPlan, DeployError> {
        let resource = self
            .deps
            .resources
            .get_resource(&task.svn_resource_id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("svn resource {}", task.svn_resource_id)))?;
        let master = self
            .deps
            .nodes
            .get_node(&task.master_server_id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("master node {}", task.master_server_id)))?;

        let default_path = &self.config.default_remote_path;
        let mut slaves: Vec<(Node, String)> = Vec::new();
        for slave_id in &task.slave_server_ids {
            if *slave_id == master.id || slaves.iter().any(|(n, _)| n.id == *slave_id) {
                continue;
            }
            let node = self
                .deps
                .nodes
                .get_node(slave_id)
                .await
                .ok_or_else(|| DeployError::NotFound(format!("slave node {}", slave_id)))?;
            let dir = resolve_slave_path(&task, slave_id, default_path);
            slaves.push((node, dir));
        }

        let commands = task
            .commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Ok(RunPlan {
            master_dir: master_path(&task, default_path),
            resource,
            master,
            slaves,
            commands,
            revision: options.revision,
            staging: self.config.staging_root.join(run_id),
            task,
        })
    }

    fn spawn(&self, plan: RunPlan, recorder: Arc<RunRecorder>) {
        let runner = Arc::new(NodeRunner::new(
            Arc::clone(&self.deps.driver),
            Arc::clone(&self.deps.vault),
            Arc::clone(&recorder),
            self.config.node_timeout,
        ));
        let pipeline = RunPipeline {
            mirror: Arc::clone(&self.deps.mirror),
            recorder: Arc::clone(&recorder),
            runner,
            worker_limit: self.config.worker_limit,
        };
        let live = Arc::clone(&self.live);
        let staging = Dir::new(plan.staging.clone());

        tokio::spawn(async move {
            // a panic inside the pipeline surfaces as a JoinError here
            let outcome = match tokio::spawn(pipeline.execute(plan)).await {
                Ok(outcome) => outcome,
                Err(e) => Err(DeployError::Internal(format!("run pipeline aborted: {}", e))),
            };
            if let Err(e) = &outcome {
                recorder.fail(e).await;
            }
            // finishedAt and leaving the live map must be observed together
            let run = {
                let mut live = live.write().await;
                let run = recorder.finish().await;
                live.remove(&run.id);
                run
            };

            if let Err(e) = staging.delete().await {
                warn!(run_id = %run.id, "Failed to remove staging directory: {}", e);
            }

            match run.status {
                TaskStatus::Success => info!(run_id = %run.id, task_id = %run.task_id, "Run succeeded"),
                _ => error!(run_id = %run.id, task_id = %run.task_id, "Run failed"),
            }
        });
    }

    pub async fn get_run(&self, run_id: &str) -> Result<TaskRun, DeployError> {
        if let Some(live) = self.live.read().await.get(run_id) {
            return Ok(live.recorder.snapshot().await);
        }
        self.deps
            .store
            .get_run(run_id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("run {}", run_id)))
    }

    /// Runs newest-first; in-flight runs show their live state
    pub async fn list_runs(&self, task_id: Option<&str>) -> Vec<TaskRun> {
        let mut runs = self.deps.store.list_runs(task_id).await;
        let live = self.live.read().await;
        for run in runs.iter_mut() {
            if let Some(entry) = live.get(&run.id) {
                *run = entry.recorder.snapshot().await;
            }
        }
        runs
    }

    pub async fn has_active_run(&self, task_id: &str) -> bool {
        self.live.read().await.values().any(|r| r.task_id == task_id)
    }

    /// Best-effort cancellation. The run reports FAILED immediately; no new
    /// command starts on any node, though commands already dispatched run
    /// to completion.
    pub async fn cancel_run(&self, run_id: &str) -> Result<TaskRun, DeployError> {
        let recorder = self
            .live
            .read()
            .await
            .get(run_id)
            .map(|r| Arc::clone(&r.recorder));
        match recorder {
            Some(recorder) => {
                if recorder.cancel().await {
                    info!(run_id = %run_id, "Run cancelled");
                }
                Ok(recorder.snapshot().await)
            }
            None => self.get_run(run_id).await,
        }
    }

    /// Cancel every in-flight run; returns how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let recorders: Vec<Arc<RunRecorder>> = self
            .live
            .read()
            .await
            .values()
            .map(|r| Arc::clone(&r.recorder))
            .collect();
        let mut cancelled = 0;
        for recorder in recorders {
            if recorder.cancel().await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Wait until no run is in flight; false when `timeout` elapsed first
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.live.read().await.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Delete a finished run. A run still in flight is refused.
    pub async fn delete_run(&self, run_id: &str) -> Result<(), DeployError> {
        let live = self.live.read().await;
        if live.contains_key(run_id) {
            return Err(DeployError::Conflict(format!("run {} is still in flight", run_id)));
        }
        if !self.deps.store.delete_run(run_id).await? {
            return Err(DeployError::NotFound(format!("run {}", run_id)));
        }
        info!(run_id = %run_id, "Deleted run");
        Ok(())
    }

    /// Delete a task's run history. Refused while one of its runs is live.
    pub async fn delete_runs_by_task(&self, task_id: &str) -> Result<usize, DeployError> {
        let live = self.live.read().await;
        if live.values().any(|r| r.task_id == task_id) {
            return Err(DeployError::Conflict(format!(
                "task {} has a run in flight",
                task_id
            )));
        }
        let removed = self.deps.store.delete_runs_by_task(task_id).await?;
        info!(task_id = %task_id, "Deleted {} runs", removed);
        Ok(removed)
    }

    /// Delete a task with its run history. The live map stays locked
    /// across the check and the delete, so no run can start in between.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), DeployError> {
        let live = self.live.read().await;
        if live.values().any(|r| r.task_id == task_id) {
            return Err(DeployError::Conflict(format!(
                "task {} has a run in flight",
                task_id
            )));
        }
        if !self.deps.store.delete_task(task_id).await? {
            return Err(DeployError::NotFound(format!("task {}", task_id)));
        }
        info!(task_id = %task_id, "Deleted task");
        Ok(())
    }
}

/// One run's phases, executed on its own task
struct RunPipeline {
    mirror: Arc<dyn SvnMirror>,
    recorder: Arc<RunRecorder>,
    runner: Arc<NodeRunner>,
    worker_limit: usize,
}

impl RunPipeline {
    async fn execute(self, plan: RunPlan) -> Result<(), DeployError> {
        let rec = &self.recorder;
        rec.log(format!(
            "Run of \"{}\" started: master {}, {} slave(s), {} command(s)",
            plan.task.name,
            plan.master.display_name(),
            plan.slaves.len(),
            plan.commands.len()
        ))
        .await;

        let everyone: Vec<&Node> = std::iter::once(&plan.master)
            .chain(plan.slaves.iter().map(|(n, _)| n))
            .collect();

        // DOWNLOADING
        self.checkpoint(PhaseEvent::Start, &everyone).await?;
        rec.advance(band(TaskStatus::Downloading).0).await;
        let (artifact, digest) = match self.download(&plan).await {
            Ok(staged) => staged,
            Err(e) => {
                rec.log(format!("[DOWNLOADING] {}", e)).await;
                self.skip_all(&plan, "source could not be fetched").await;
                return Err(e);
            }
        };
        self.checkpoint(PhaseEvent::Downloaded, &everyone).await?;

        // UPLOADING
        rec.advance(band(TaskStatus::Uploading).0).await;
        let file_name = match plan.resource.resource_type {
            ResourceType::File => artifact.file_name().map(|n| n.to_string_lossy().to_string()),
            ResourceType::Folder => None,
        };
        let master_target = push_target(&plan.master_dir, file_name.as_deref());
        if let Err(e) = self.runner.push(&plan.master, &artifact, &master_target).await {
            rec.node_log(plan.master.display_name(), format!("[UPLOADING] {}", e))
                .await;
            for (slave, _) in &plan.slaves {
                rec.node_log(slave.display_name(), "skipped: master upload failed")
                    .await;
            }
            return Err(e);
        }
        rec.advance(band(TaskStatus::Uploading).1).await;
        let has_slaves = !plan.slaves.is_empty();
        self.checkpoint(PhaseEvent::Uploaded { has_slaves }, &everyone)
            .await?;

        // SYNCING
        let mut failures: Vec<DeployError> = Vec::new();
        let mut targets: Vec<(Node, String)> = vec![(plan.master.clone(), plan.master_dir.clone())];
        if has_slaves {
            let current = tree_digest(&artifact).await?;
            if current != digest {
                self.skip_all(&plan, "staged content failed validation").await;
                return Err(DeployError::Internal(format!(
                    "staged content changed after download ({} != {})",
                    current, digest
                )));
            }
            let (synced, failed) = self.fan_out(&plan, &artifact, file_name.as_deref()).await;
            targets.extend(synced);
            failures.extend(failed);
            // undispatched slaves were already marked by fan_out
            let pending: Vec<&Node> = targets.iter().map(|(n, _)| n).collect();
            self.checkpoint(PhaseEvent::Synced, &pending).await?;
        }

        // EXECUTING
        rec.advance(band(TaskStatus::Executing).0).await;
        failures.extend(self.execute_commands(&plan, targets).await);

        if self.recorder.is_cancelled() {
            return Err(DeployError::Cancelled("run was cancelled".to_string()));
        }
        if let Some(first) = failures.into_iter().next() {
            return Err(first);
        }
        rec.transition(PhaseEvent::Completed).await?;
        rec.log("Run completed successfully on all nodes").await;
        Ok(())
    }

    async fn download(&self, plan: &RunPlan) -> Result<(PathBuf, String), DeployError> {
        let requested = plan.revision.as_deref().unwrap_or("latest");
        self.recorder
            .log(format!("Fetching {} at revision {}", plan.resource.url, requested))
            .await;

        let outcome = self
            .mirror
            .sync(&plan.resource.id, plan.revision.as_deref(), &plan.staging)
            .await?;
        self.recorder.set_revision(&outcome.revision).await;

        let digest = tree_digest(&outcome.artifact).await?;
        self.recorder
            .log(format!(
                "Fetched revision {} ({}, {})",
                outcome.revision,
                human_size(outcome.size_bytes),
                digest
            ))
            .await;
        self.recorder.advance(band(TaskStatus::Downloading).1).await;
        Ok((outcome.artifact, digest))
    }

    /// Push the staged artifact to every slave, `worker_limit` at a time.
    /// Returns the slaves that received it and the failures.
    async fn fan_out(
        &self,
        plan: &RunPlan,
        artifact: &Path,
        file_name: Option<&str>,
    ) -> (Vec<(Node, String)>, Vec<DeployError>) {
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let counter = Arc::new(PhaseCounter::new(TaskStatus::Syncing, plan.slaves.len()));
        let mut handles = Vec::with_capacity(plan.slaves.len());

        for (slave, dir) in plan.slaves.iter().cloned() {
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
            if self.recorder.is_cancelled() {
                self.recorder
                    .node_log(slave.display_name(), "skipped: run cancelled")
                    .await;
                continue;
            }
            let runner = Arc::clone(&self.runner);
            let recorder = Arc::clone(&self.recorder);
            let counter = Arc::clone(&counter);
            let artifact = artifact.to_path_buf();
            let target = push_target(&dir, file_name);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = runner.push(&slave, &artifact, &target).await;
                recorder.advance(counter.tick()).await;
                (slave, dir, result)
            }));
        }

        let mut synced = Vec::new();
        let mut failed = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((slave, dir, Ok(()))) => synced.push((slave, dir)),
                Ok((slave, _, Err(e))) => {
                    self.recorder
                        .node_log(slave.display_name(), format!("[SYNCING] {}", e))
                        .await;
                    self.recorder
                        .node_log(slave.display_name(), "skipped: commands not run, content missing")
                        .await;
                    failed.push(e);
                }
                Err(e) => failed.push(DeployError::Internal(format!("sync worker aborted: {}", e))),
            }
        }
        // keep task order for EXECUTING
        synced.sort_by_key(|(node, _): &(Node, String)| {
            plan.slaves.iter().position(|(s, _)| s.id == node.id)
        });
        (synced, failed)
    }

    /// Run the command list on each target. Dispatch follows `targets`
    /// order (master first); one node's failure leaves the others running.
    async fn execute_commands(&self, plan: &RunPlan, targets: Vec<(Node, String)>) -> Vec<DeployError> {
        let mut failures = Vec::new();
        if plan.commands.is_empty() {
            self.recorder.log("No commands configured").await;
            return failures;
        }

        let commands = Arc::new(plan.commands.clone());
        let counter = Arc::new(PhaseCounter::new(
            TaskStatus::Executing,
            targets.len() * commands.len(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut handles = Vec::with_capacity(targets.len());

        for (node, dir) in targets {
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
            if self.recorder.is_cancelled() {
                self.recorder
                    .node_log(node.display_name(), "skipped: run cancelled")
                    .await;
                continue;
            }
            let runner = Arc::clone(&self.runner);
            let commands = Arc::clone(&commands);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = runner.run_commands(&node, &dir, &commands, &counter).await;
                (node, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((node, Ok(()))) => {
                    self.recorder
                        .node_log(node.display_name(), "Commands completed successfully")
                        .await;
                }
                Ok((node, Err(e))) => {
                    self.recorder
                        .node_log(node.display_name(), format!("[EXECUTING] {}", e))
                        .await;
                    failures.push(e);
                }
                Err(e) => failures.push(DeployError::Internal(format!("command worker aborted: {}", e))),
            }
        }
        failures
    }

    /// Apply a phase event. When the run was cancelled meanwhile, `pending`
    /// nodes are marked skipped before the cancellation propagates.
    async fn checkpoint(&self, event: PhaseEvent, pending: &[&Node]) -> Result<(), DeployError> {
        match self.recorder.transition(event).await {
            Ok(_) => Ok(()),
            Err(e @ DeployError::Cancelled(_)) => {
                for node in pending {
                    self.recorder
                        .node_log(node.display_name(), "skipped: run cancelled")
                        .await;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn skip_all(&self, plan: &RunPlan, reason: &str) {
        let nodes = std::iter::once(&plan.master).chain(plan.slaves.iter().map(|(n, _)| n));
        for node in nodes {
            self.recorder
                .node_log(node.display_name(), format!("skipped: {}", reason))
                .await;
        }
    }
}
