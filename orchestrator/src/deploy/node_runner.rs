//! Per-node work within a run: pushing content and running commands

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::deploy::progress::PhaseCounter;
use crate::deploy::recorder::RunRecorder;
use crate::errors::DeployError;
use crate::models::node::Node;
use crate::transfer::{CommandEvent, SessionAuth, TransferDriver};
use crate::vault::CredentialVault;

/// Runs transfers and commands against nodes on behalf of one run.
///
/// Each node has a single time budget covering its connection, transfer
/// and command execution together. Time spent waiting on other nodes is
/// not charged.
pub struct NodeRunner {
    driver: Arc<dyn TransferDriver>,
    vault: Arc<dyn CredentialVault>,
    recorder: Arc<RunRecorder>,
    node_timeout: Duration,
    spent: Mutex<HashMap<String, Duration>>,
}

impl NodeRunner {
    pub fn new(
        driver: Arc<dyn TransferDriver>,
        vault: Arc<dyn CredentialVault>,
        recorder: Arc<RunRecorder>,
        node_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            vault,
            recorder,
            node_timeout,
            spent: Mutex::new(HashMap::new()),
        }
    }

    async fn remaining(&self, node: &Node) -> Duration {
        let spent = self.spent.lock().await;
        let used = spent.get(&node.id).copied().unwrap_or_default();
        self.node_timeout.saturating_sub(used)
    }

    async fn charge(&self, node: &Node, elapsed: Duration) {
        let mut spent = self.spent.lock().await;
        *spent.entry(node.id.clone()).or_default() += elapsed;
    }

    async fn bounded<T>(
        &self,
        node: &Node,
        what: &str,
        work: impl Future<Output = Result<T, DeployError>>,
    ) -> Result<T, DeployError> {
        let remaining = self.remaining(node).await;
        let started = Instant::now();
        let outcome = tokio::time::timeout(remaining, work).await;
        self.charge(node, started.elapsed()).await;
        outcome.map_err(|_| {
            DeployError::timeout(format!("{} on {}", what, node.display_name()), self.node_timeout)
        })?
    }

    async fn auth(&self, node: &Node) -> Result<SessionAuth, DeployError> {
        SessionAuth::resolve(node, self.vault.as_ref()).await
    }

    /// Copy the staged artifact to `target` on `node`
    pub async fn push(&self, node: &Node, artifact: &Path, target: &str) -> Result<(), DeployError> {
        let name = node.display_name();
        self.recorder
            .node_log(name, format!("Transferring to {} via {}", target, node.protocol))
            .await;

        let work = async {
            let auth = self.auth(node).await?;
            self.driver.push(node, artifact, target, &auth).await
        };
        self.bounded(node, "transfer", work).await?;

        info!(node = %name, target = %target, "Content transferred");
        self.recorder.node_log(name, "Transfer complete").await;
        Ok(())
    }

    /// Run `commands` in order inside `workdir`. The first failing command
    /// ends this node's list. Cancellation is honored between commands.
    pub async fn run_commands(
        &self,
        node: &Node,
        workdir: &str,
        commands: &[String],
        counter: &PhaseCounter,
    ) -> Result<(), DeployError> {
        let work = async {
            let auth = self.auth(node).await?;
            for command in commands {
                if self.recorder.is_cancelled() {
                    return Err(DeployError::Cancelled(format!(
                        "remaining commands on {} not started",
                        node.display_name()
                    )));
                }
                self.run_command(node, workdir, command, &auth).await?;
                self.recorder.advance(counter.tick()).await;
            }
            Ok(())
        };
        self.bounded(node, "commands", work).await
    }

    async fn run_command(
        &self,
        node: &Node,
        workdir: &str,
        command: &str,
        auth: &SessionAuth,
    ) -> Result<(), DeployError> {
        let name = node.display_name();
        self.recorder.node_log(name, format!("$ {}", command)).await;
        debug!(node = %name, workdir = %workdir, "Executing `{}`", command);

        let mut stream = self.driver.exec(node, workdir, command, auth).await?;
        let mut exit = None;
        while let Some(event) = stream.next().await {
            match event? {
                CommandEvent::Stdout(line) => self.recorder.node_log(name, line).await,
                CommandEvent::Stderr(line) => self.recorder.node_log(name, format!("[stderr] {}", line)).await,
                CommandEvent::Exit(code) => exit = Some(code),
            }
        }

        match exit {
            Some(0) => Ok(()),
            Some(code) => Err(DeployError::CommandError {
                command: command.to_string(),
                code,
            }),
            None => Err(DeployError::TransportError(format!(
                "session to {} ended before `{}` reported an exit status",
                name, command
            ))),
        }
    }
}
