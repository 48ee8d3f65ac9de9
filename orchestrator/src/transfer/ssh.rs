//! OpenSSH-backed transfer driver
//!
//! Shells out to `ssh`, `scp`, `sftp` and `curl`. Password and passphrase
//! prompts are answered by `sshpass -e`, which reads the secret from the
//! child's environment so it never appears in an argument list.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::dir::walk_files;
use crate::models::node::{AuthMethod, Node, Protocol};
use crate::storage::settings::EngineSettings;
use crate::transfer::{CommandEvent, CommandStream, SessionAuth, TransferDriver};
use crate::utils::shell_quote;

/// Port used for remote commands on FTP nodes, whose configured port is the
/// FTP control port
const SSH_PORT: u16 = 22;

/// `sshpass` exit code for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

pub struct OpenSshDriver {
    ssh: String,
    scp: String,
    sftp: String,
    curl: String,
    sshpass: String,
    connect_timeout: Duration,
}

impl OpenSshDriver {
    pub fn from_settings(engine: &EngineSettings) -> Self {
        Self {
            ssh: engine.ssh_binary.clone(),
            scp: engine.scp_binary.clone(),
            sftp: engine.sftp_binary.clone(),
            curl: engine.curl_binary.clone(),
            sshpass: engine.sshpass_binary.clone(),
            connect_timeout: Duration::from_secs(engine.connect_timeout_secs),
        }
    }

    fn ssh_options(&self, auth: &SessionAuth) -> Vec<String> {
        let interactive = auth.prompt_secret().is_some();
        let mut opts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            // must precede `sftp -b`, which would otherwise force batch mode
            "-o".to_string(),
            format!("BatchMode={}", if interactive { "no" } else { "yes" }),
        ];
        if auth.method == AuthMethod::Key && !auth.key_path.is_empty() {
            opts.push("-i".to_string());
            opts.push(auth.key_path.clone());
        }
        if auth.method == AuthMethod::Password {
            opts.push("-o".to_string());
            opts.push("PreferredAuthentications=password,keyboard-interactive".to_string());
        }
        opts
    }

    /// Build a command for `program`, wrapped in `sshpass` when the session
    /// has a secret to answer prompts with.
    fn command(&self, program: &str, auth: &SessionAuth) -> Command {
        let mut cmd = match auth.prompt_secret() {
            Some(secret) => {
                let mut cmd = Command::new(&self.sshpass);
                cmd.arg("-e");
                if auth.method == AuthMethod::Key {
                    cmd.args(["-P", "passphrase"]);
                }
                cmd.env("SSHPASS", secret.expose_secret());
                cmd.arg(program);
                cmd
            }
            None => Command::new(program),
        };
        cmd.kill_on_drop(true);
        cmd
    }

    fn ssh_command(&self, node: &Node, auth: &SessionAuth) -> Command {
        let port = match node.protocol {
            Protocol::Ftp => SSH_PORT,
            _ => node.port,
        };
        let mut cmd = self.command(&self.ssh, auth);
        cmd.args(self.ssh_options(auth))
            .arg("-p")
            .arg(port.to_string())
            .arg(format!("{}@{}", auth.username, node.ip));
        cmd
    }

    /// Run a remote shell line to completion, discarding output
    async fn ssh_run(&self, node: &Node, line: &str, auth: &SessionAuth) -> Result<(), DeployError> {
        let mut cmd = self.ssh_command(node, auth);
        cmd.arg(line);
        run_to_completion(cmd, None, node, "ssh").await
    }

    async fn push_scp(&self, node: &Node, local: &Path, remote: &str, auth: &SessionAuth) -> Result<(), DeployError> {
        let is_file = tokio::fs::metadata(local).await?.is_file();
        let mkdir_target = if is_file { remote_parent(remote) } else { remote.to_string() };
        self.ssh_run(node, &format!("mkdir -p {}", shell_quote(&mkdir_target)), auth)
            .await?;

        let mut sources: Vec<PathBuf> = Vec::new();
        let target;
        if is_file {
            sources.push(local.to_path_buf());
            target = remote.to_string();
        } else {
            let mut entries = tokio::fs::read_dir(local).await?;
            while let Some(entry) = entries.next_entry().await? {
                sources.push(entry.path());
            }
            sources.sort();
            target = format!("{}/", remote.trim_end_matches('/'));
        }
        if sources.is_empty() {
            return Ok(());
        }

        let mut cmd = self.command(&self.scp, auth);
        cmd.args(self.ssh_options(auth))
            .arg("-P")
            .arg(node.port.to_string())
            .arg("-r")
            .args(&sources)
            .arg(format!("{}@{}:{}", auth.username, bracket_host(&node.ip), target));
        run_to_completion(cmd, None, node, "scp").await
    }

    async fn push_sftp(&self, node: &Node, local: &Path, remote: &str, auth: &SessionAuth) -> Result<(), DeployError> {
        let script = sftp_batch(local, remote).await?;
        let mut cmd = self.command(&self.sftp, auth);
        cmd.args(self.ssh_options(auth))
            .arg("-P")
            .arg(node.port.to_string())
            .args(["-b", "-"])
            .arg(format!("{}@{}", auth.username, bracket_host(&node.ip)));
        run_to_completion(cmd, Some(script), node, "sftp").await
    }

    async fn push_ftp(&self, node: &Node, local: &Path, remote: &str, auth: &SessionAuth) -> Result<(), DeployError> {
        let password = auth
            .credential
            .as_ref()
            .and_then(|c| c.password.as_ref())
            .map(|s| s.expose_secret().to_string())
            .unwrap_or_default();

        let mut config = String::new();
        config.push_str(&format!(
            "user = \"{}\"\n",
            curl_escape(&format!("{}:{}", auth.username, password))
        ));
        config.push_str("ftp-create-dirs\nsilent\nshow-error\n");
        config.push_str(&format!("connect-timeout = {}\n", self.connect_timeout.as_secs().max(1)));

        let is_file = tokio::fs::metadata(local).await?.is_file();
        for rel in walk_files(local).await? {
            let (source, target) = if is_file {
                (local.to_path_buf(), remote.to_string())
            } else {
                (local.join(&rel), join_remote(remote, &rel))
            };
            config.push_str(&format!("upload-file = \"{}\"\n", curl_escape(&source.to_string_lossy())));
            config.push_str(&format!("url = \"{}\"\n", ftp_url(&node.ip, node.port, &target)));
        }

        let mut cmd = Command::new(&self.curl);
        cmd.args(["-K", "-"]).kill_on_drop(true);
        run_to_completion(cmd, Some(config), node, "curl").await
    }
}

#[async_trait]
impl TransferDriver for OpenSshDriver {
    async fn push(&self, node: &Node, local: &Path, remote: &str, auth: &SessionAuth) -> Result<(), DeployError> {
        debug!(
            node = %node.display_name(),
            protocol = %node.protocol,
            "Pushing {} to {}",
            local.display(),
            remote
        );
        match node.protocol {
            Protocol::Scp => self.push_scp(node, local, remote, auth).await,
            Protocol::Sftp => self.push_sftp(node, local, remote, auth).await,
            Protocol::Ftp => self.push_ftp(node, local, remote, auth).await,
        }
    }

    async fn exec(
        &self,
        node: &Node,
        workdir: &str,
        command: &str,
        auth: &SessionAuth,
    ) -> Result<CommandStream, DeployError> {
        let mut cmd = self.ssh_command(node, auth);
        cmd.arg(format!("cd {} && {}", shell_quote(workdir), command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| {
            DeployError::TransportError(format!("Failed to start ssh to {}: {}", node.display_name(), e))
        })?;
        Ok(stream_child(child))
    }
}

/// Turn a running child into a stream of output lines followed by its exit
/// code. Dropping the stream kills the child.
fn stream_child(mut child: Child) -> CommandStream {
    let (tx, rx) = mpsc::channel::<Result<CommandEvent, DeployError>>(64);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        let forward = async {
            tokio::join!(
                forward_lines(stdout, tx.clone(), CommandEvent::Stdout),
                forward_lines(stderr, tx.clone(), CommandEvent::Stderr),
            )
        };
        tokio::select! {
            _ = forward => {}
            _ = tx.closed() => {
                let _ = child.kill().await;
                return;
            }
        }
        let event = match child.wait().await {
            Ok(status) => Ok(CommandEvent::Exit(status.code().unwrap_or(-1))),
            Err(e) => Err(DeployError::TransportError(format!("Lost remote session: {}", e))),
        };
        let _ = tx.send(event).await;
    });

    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) }).boxed()
}

async fn forward_lines<R>(
    reader: Option<R>,
    tx: mpsc::Sender<Result<CommandEvent, DeployError>>,
    wrap: fn(String) -> CommandEvent,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(Ok(wrap(line))).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx
                    .send(Err(DeployError::TransportError(format!("Failed to read output: {}", e))))
                    .await;
                return;
            }
        }
    }
}

async fn run_to_completion(
    mut cmd: Command,
    stdin: Option<String>,
    node: &Node,
    tool: &str,
) -> Result<(), DeployError> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| DeployError::TransportError(format!("Failed to start {}: {}", tool, e)))?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify_failure(tool, node, output.status.code(), &stderr))
}

fn classify_failure(tool: &str, node: &Node, code: Option<i32>, stderr: &str) -> DeployError {
    let message = format!(
        "{} to {} failed ({}): {}",
        tool,
        node.display_name(),
        code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
        stderr
    );
    let denied = stderr.contains("Permission denied")
        || stderr.contains("Login incorrect")
        || stderr.contains("Access denied");
    if code == Some(SSHPASS_BAD_PASSWORD) || denied {
        DeployError::AuthError(message)
    } else {
        DeployError::TransportError(message)
    }
}

/// sftp batch script that recreates `local` at `remote`
async fn sftp_batch(local: &Path, remote: &str) -> Result<String, DeployError> {
    let mut script = String::new();
    let is_file = tokio::fs::metadata(local).await?.is_file();
    let files = walk_files(local).await?;

    let mut dirs: Vec<String> = Vec::new();
    let base = if is_file { remote_parent(remote) } else { remote.to_string() };
    push_ancestors(&mut dirs, &base);
    if !is_file {
        for rel in &files {
            if let Some(parent) = rel.parent().filter(|p| !p.as_os_str().is_empty()) {
                push_ancestors(&mut dirs, &join_remote(remote, parent));
            }
        }
    }
    for dir in &dirs {
        // leading '-' keeps going when the directory already exists
        script.push_str(&format!("-mkdir {}\n", sftp_quote(dir)));
    }

    for rel in &files {
        let (source, target) = if is_file {
            (local.to_path_buf(), remote.to_string())
        } else {
            (local.join(rel), join_remote(remote, rel))
        };
        script.push_str(&format!(
            "put {} {}\n",
            sftp_quote(&source.to_string_lossy()),
            sftp_quote(&target)
        ));
    }
    Ok(script)
}

fn push_ancestors(dirs: &mut Vec<String>, path: &str) {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        if !dirs.contains(&current) {
            dirs.push(current.clone());
        }
    }
}

fn remote_parent(remote: &str) -> String {
    match remote.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    }
}

fn join_remote(remote: &str, rel: &Path) -> String {
    let rel = rel.to_string_lossy().replace('\\', "/");
    if rel.is_empty() {
        return remote.to_string();
    }
    format!("{}/{}", remote.trim_end_matches('/'), rel)
}

fn bracket_host(ip: &str) -> String {
    if ip.contains(':') && !ip.starts_with('[') {
        format!("[{}]", ip)
    } else {
        ip.to_string()
    }
}

fn sftp_quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

fn curl_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// FTP URL for an absolute or login-relative remote path
fn ftp_url(host: &str, port: u16, remote: &str) -> String {
    let encoded: String = remote
        .trim_start_matches('/')
        .split('/')
        .map(|seg| url::form_urlencoded::byte_serialize(seg.as_bytes()).collect::<String>().replace('+', "%20"))
        .collect::<Vec<_>>()
        .join("/");
    let root = if remote.starts_with('/') { "%2F" } else { "" };
    format!("ftp://{}:{}/{}{}", bracket_host(host), port, root, encoded)
}
