//! Connectivity probe
//!
//! A probe opens a TCP connection to the node's port to measure latency,
//! then (for SSH-capable nodes) runs `echo ping` to prove the session
//! authenticates. Concurrency across nodes is bounded by a semaphore.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::node::{Node, ProbeReport, Protocol};
use crate::transfer::{CommandEvent, SessionAuth, TransferDriver};
use crate::utils::now_string;
use crate::vault::{Credential, CredentialVault};

/// Max nodes probed at once by [`probe_many`]
const MAX_CONCURRENT: usize = 16;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Probe one node. `username` and `credential` override what the node
    /// record and the vault would supply.
    async fn probe(&self, node: &Node, username: Option<&str>, credential: Option<Credential>) -> ProbeReport;
}

pub struct SshProbe {
    driver: Arc<dyn TransferDriver>,
    vault: Arc<dyn CredentialVault>,
    connect_timeout: Duration,
    session_timeout: Duration,
}

impl SshProbe {
    pub fn new(
        driver: Arc<dyn TransferDriver>,
        vault: Arc<dyn CredentialVault>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            vault,
            connect_timeout,
            session_timeout: connect_timeout * 3,
        }
    }

    async fn tcp_latency(&self, node: &Node) -> Result<u64, DeployError> {
        let addr: SocketAddr = lookup_host((node.ip.as_str(), node.port))
            .await
            .map_err(|e| DeployError::TransportError(format!("Cannot resolve {}: {}", node.ip, e)))?
            .next()
            .ok_or_else(|| DeployError::TransportError(format!("Cannot resolve {}", node.ip)))?;

        let started = Instant::now();
        tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DeployError::timeout(format!("connect to {}", addr), self.connect_timeout))?
            .map_err(|e| DeployError::TransportError(format!("connect to {} failed: {}", addr, e)))?;
        Ok(started.elapsed().as_millis() as u64)
    }

    async fn session_check(&self, node: &Node, auth: &SessionAuth) -> Result<(), DeployError> {
        let check = async {
            let mut stream = self.driver.exec(node, "/", "echo ping", auth).await?;
            let mut answered = false;
            let mut stderr = String::new();
            while let Some(event) = stream.next().await {
                match event? {
                    CommandEvent::Stdout(line) => answered |= line.trim() == "ping",
                    CommandEvent::Stderr(line) => stderr = line,
                    CommandEvent::Exit(0) if answered => return Ok(()),
                    CommandEvent::Exit(code) => {
                        return Err(DeployError::AuthError(format!(
                            "session check exited with {}: {}",
                            code, stderr
                        )))
                    }
                }
            }
            Err(DeployError::TransportError("session closed before answering".to_string()))
        };
        tokio::time::timeout(self.session_timeout, check)
            .await
            .map_err(|_| DeployError::timeout("session check", self.session_timeout))?
    }

    async fn auth_for(
        &self,
        node: &Node,
        username: Option<&str>,
        credential: Option<Credential>,
    ) -> Result<SessionAuth, DeployError> {
        let mut auth = match credential {
            Some(credential) => SessionAuth::for_node(node, Some(credential)),
            None => SessionAuth::resolve(node, self.vault.as_ref()).await?,
        };
        if let Some(username) = username.map(str::trim).filter(|u| !u.is_empty()) {
            auth.username = username.to_string();
        }
        Ok(auth)
    }
}

#[async_trait]
impl ConnectivityProbe for SshProbe {
    async fn probe(&self, node: &Node, username: Option<&str>, credential: Option<Credential>) -> ProbeReport {
        let outcome = async {
            let latency = self.tcp_latency(node).await?;
            if node.protocol != Protocol::Ftp {
                let auth = self.auth_for(node, username, credential).await?;
                self.session_check(node, &auth).await?;
            }
            Ok::<u64, DeployError>(latency)
        }
        .await;

        let report = match outcome {
            Ok(latency_ms) => ProbeReport {
                node_id: node.id.clone(),
                reachable: true,
                latency_ms,
                checked_at: now_string(),
                error: None,
            },
            Err(e) => ProbeReport {
                node_id: node.id.clone(),
                reachable: false,
                latency_ms: 0,
                checked_at: now_string(),
                error: Some(e.to_string()),
            },
        };
        debug!(
            node = %node.display_name(),
            reachable = report.reachable,
            latency_ms = report.latency_ms,
            "Probed node"
        );
        report
    }
}

/// Probe every node, at most [`MAX_CONCURRENT`] at a time. Reports come back
/// in input order.
pub async fn probe_many(probe: Arc<dyn ConnectivityProbe>, nodes: Vec<Node>) -> Vec<ProbeReport> {
    info!("Probing {} nodes", nodes.len());
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
    let mut handles = Vec::with_capacity(nodes.len());

    for node in nodes {
        let sem = Arc::clone(&semaphore);
        let probe = Arc::clone(&probe);
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.ok();
            probe.probe(&node, None, None).await
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(report) = handle.await {
            reports.push(report);
        }
    }

    let reachable = reports.iter().filter(|r| r.reachable).count();
    info!("Probe complete: {}/{} reachable", reachable, reports.len());
    reports
}
