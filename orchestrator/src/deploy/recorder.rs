//! Live run record: log, phase, progress and event publication

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::deploy::fsm::{PhaseEvent, RunFsm};
use crate::deploy::progress::ProgressTracker;
use crate::errors::DeployError;
use crate::models::task::{RunEvent, TaskRun, TaskStatus};
use crate::store::TaskStore;
use crate::utils::now_string;

/// Marker for engine faults in the run log
pub const INTERNAL_MARKER: &str = "[internal]";

struct RunState {
    run: TaskRun,
    fsm: RunFsm,
    progress: ProgressTracker,
}

/// Owns an in-flight [`TaskRun`]. All mutations of the run go through here,
/// and each one is published as a [`RunEvent`].
pub struct RunRecorder {
    state: RwLock<RunState>,
    cancelled: AtomicBool,
    store: Arc<dyn TaskStore>,
    events: broadcast::Sender<RunEvent>,
}

impl RunRecorder {
    pub fn new(run: TaskRun, store: Arc<dyn TaskStore>, events: broadcast::Sender<RunEvent>) -> Self {
        Self {
            state: RwLock::new(RunState {
                run,
                fsm: RunFsm::new(),
                progress: ProgressTracker::default(),
            }),
            cancelled: AtomicBool::new(false),
            store,
            events,
        }
    }

    pub async fn snapshot(&self) -> TaskRun {
        self.state.read().await.run.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn publish(&self, run: &TaskRun, log: Option<String>, finished: bool) {
        let _ = self.events.send(RunEvent {
            task_id: run.task_id.clone(),
            run_id: run.id.clone(),
            status: run.status,
            progress: run.progress,
            log,
            finished,
        });
    }

    /// Append a timestamped line to the run log
    pub async fn log(&self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", now_string(), message.as_ref());
        let mut state = self.state.write().await;
        state.run.logs.push(line.clone());
        self.publish(&state.run, Some(line), false);
    }

    /// Append a line attributed to a node
    pub async fn node_log(&self, node: &str, message: impl AsRef<str>) {
        self.log(format!("[{}] {}", node, message.as_ref())).await;
    }

    /// Raise progress; lower values are ignored
    pub async fn advance(&self, target: u8) {
        let mut state = self.state.write().await;
        if let Some(value) = state.progress.advance(target) {
            state.run.progress = value;
            self.publish(&state.run, None, false);
        }
    }

    /// Apply a phase event. Fails once the run is terminal, which is how a
    /// cancelled run's pipeline learns to stop.
    pub async fn transition(&self, event: PhaseEvent) -> Result<TaskStatus, DeployError> {
        let snapshot = {
            let mut state = self.state.write().await;
            let status = match state.fsm.process(event) {
                Ok(status) => status,
                Err(_) if state.fsm.is_cancelled() => {
                    return Err(DeployError::Cancelled("run was cancelled".to_string()));
                }
                Err(e) => return Err(DeployError::Internal(e)),
            };
            state.run.status = status;
            if status == TaskStatus::Success {
                state.run.progress = state.progress.complete();
            }
            self.publish(&state.run, None, false);
            state.run.clone()
        };
        debug!(run_id = %snapshot.id, status = %snapshot.status, "Run transitioned");
        self.persist(&snapshot).await;
        Ok(snapshot.status)
    }

    /// Fail the run with `error` unless it already reached a terminal state
    pub async fn fail(&self, error: &DeployError) {
        let message = match error {
            DeployError::Internal(_) => format!("{} {}", INTERNAL_MARKER, error),
            _ => error.to_string(),
        };
        let already_terminal = self.state.read().await.fsm.is_terminal();
        if already_terminal {
            return;
        }
        self.log(format!("Run failed: {}", message)).await;
        let _ = self.transition(PhaseEvent::Fail(message)).await;
    }

    /// Operator cancellation: the run turns FAILED at once and accepts no
    /// further phase changes. Returns false when it had already finished.
    pub async fn cancel(&self) -> bool {
        if self.state.read().await.fsm.is_terminal() {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.log("Run cancelled by operator; no further commands will be started").await;
        self.transition(PhaseEvent::Cancel).await.is_ok()
    }

    pub async fn set_revision(&self, revision: &str) {
        let mut state = self.state.write().await;
        state.run.revision = Some(revision.to_string());
    }

    /// Stamp `finishedAt` and persist the final record
    pub async fn finish(&self) -> TaskRun {
        let snapshot = {
            let mut state = self.state.write().await;
            if !state.fsm.is_terminal() {
                let msg = format!("{} run ended without a terminal status", INTERNAL_MARKER);
                state.run.logs.push(format!("[{}] {}", now_string(), msg));
                let _ = state.fsm.process(PhaseEvent::Fail(msg));
                state.run.status = TaskStatus::Failed;
            }
            state.run.finished_at = Some(now_string());
            self.publish(&state.run, None, true);
            state.run.clone()
        };
        self.persist(&snapshot).await;
        snapshot
    }

    /// Write the run and mirror its status onto the task definition
    async fn persist(&self, run: &TaskRun) {
        if let Err(e) = self.store.save_run(run.clone()).await {
            warn!(run_id = %run.id, "Failed to persist run: {}", e);
        }
        if let Err(e) = self
            .store
            .record_run_status(&run.task_id, run.status, run.progress, &run.started_at)
            .await
        {
            warn!(task_id = %run.task_id, "Failed to mirror run status onto task: {}", e);
        }
    }
}
