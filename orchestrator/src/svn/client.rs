//! `svn` command-line client

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::tree_size;
use crate::models::resource::{ResourceStatus, ResourceType, SvnCheckResult, SvnResource};
use crate::registry::ResourceRegistry;
use crate::svn::{classify_failure, normalize_revision, SvnMirror, SyncOutcome};
use crate::utils::{human_size, now_string};
use crate::vault::CredentialVault;

const COMMON_ARGS: [&str; 3] = ["--non-interactive", "--no-auth-cache", "--trust-server-cert"];

/// Directory name used for folder resources whose URL has no basename
const EXPORT_DIR_NAME: &str = "export";

/// Mirror backed by the system `svn` binary
pub struct SvnCli {
    binary: String,
    timeout: Duration,
    resources: Arc<dyn ResourceRegistry>,
    vault: Arc<dyn CredentialVault>,
}

struct Auth<'a> {
    username: &'a str,
    password: Option<&'a SecretString>,
}

impl SvnCli {
    pub fn new(
        binary: impl Into<String>,
        timeout: Duration,
        resources: Arc<dyn ResourceRegistry>,
        vault: Arc<dyn CredentialVault>,
    ) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            resources,
            vault,
        }
    }

    /// Check the svn client is installed
    pub async fn check_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .arg("--quiet")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run svn with the shared flags; the password travels over stdin.
    async fn run(
        &self,
        action: &str,
        args: &[&str],
        auth: &Auth<'_>,
        stdout: Stdio,
    ) -> Result<Vec<u8>, DeployError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(action).args(COMMON_ARGS);
        if !auth.username.trim().is_empty() {
            cmd.args(["--username", auth.username.trim()]);
        }
        if auth.password.is_some() {
            cmd.arg("--password-from-stdin");
        }
        cmd.args(args)
            .stdin(if auth.password.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running svn {} {:?}", action, args);
        let mut child = cmd
            .spawn()
            .map_err(|e| DeployError::SyncError(format!("Failed to run svn {}: {}", action, e)))?;

        if let (Some(password), Some(mut stdin)) = (auth.password, child.stdin.take()) {
            stdin.write_all(password.expose_secret().as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DeployError::timeout(format!("svn {}", action), self.timeout))?
            .map_err(|e| DeployError::SyncError(format!("svn {} failed: {}", action, e)))?;

        if !output.status.success() {
            let mut msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if msg.is_empty() {
                msg = format!("exit status {}", output.status);
            }
            return Err(classify_failure(action, &msg));
        }
        Ok(output.stdout)
    }

    /// Resolve the revision of `url` (latest when `revision` is `None`)
    async fn info(&self, url: &str, revision: Option<&str>, auth: &Auth<'_>) -> Result<String, DeployError> {
        let mut args = vec!["--show-item", "revision"];
        if let Some(rev) = revision {
            args.extend(["--revision", rev]);
        }
        args.push(url);
        let out = self.run("info", &args, auth, Stdio::piped()).await?;
        let rev = String::from_utf8_lossy(&out).trim().to_string();
        if rev.is_empty() {
            return Err(DeployError::SyncError("svn info returned empty revision".to_string()));
        }
        Ok(rev)
    }

    async fn export(&self, url: &str, revision: &str, dest: &Path, auth: &Auth<'_>) -> Result<(), DeployError> {
        let dest = dest.to_string_lossy();
        let args = ["--force", "--revision", revision, url, dest.as_ref()];
        self.run("export", &args, auth, Stdio::null()).await?;
        Ok(())
    }

    async fn cat_to_file(&self, url: &str, revision: &str, dest: &Path, auth: &Auth<'_>) -> Result<(), DeployError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(dest).await?.into_std().await;
        let args = ["--revision", revision, url];
        self.run("cat", &args, auth, Stdio::from(file)).await?;
        Ok(())
    }

    async fn password_for(&self, resource: &SvnResource) -> Result<Option<SecretString>, DeployError> {
        if resource.username.trim().is_empty() {
            return Ok(None);
        }
        let credential = self.vault.resolve(&resource.id, &resource.username).await?;
        Ok(credential.and_then(|c| c.password))
    }

    async fn load(&self, resource_id: &str) -> Result<SvnResource, DeployError> {
        self.resources
            .get_resource(resource_id)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("svn resource {}", resource_id)))
    }

    async fn mark(&self, resource: &mut SvnResource, status: ResourceStatus) {
        resource.status = status;
        resource.last_checked = now_string();
        if let Err(e) = self.resources.update_resource(resource.clone()).await {
            warn!("Failed to record resource {} status: {}", resource.id, e);
        }
    }

    /// Test connectivity to a repository URL with explicit credentials
    pub async fn check(&self, url: &str, username: &str, password: Option<&str>) -> SvnCheckResult {
        let started = Instant::now();
        let secret = password
            .filter(|p| !p.is_empty())
            .map(|p| SecretString::from(p.to_string()));
        let auth = Auth {
            username,
            password: secret.as_ref(),
        };
        let result = self.info(url, None, &auth).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(revision) => SvnCheckResult {
                ok: true,
                revision: Some(revision),
                message: None,
                duration_ms,
                checked_at: now_string(),
            },
            Err(e) => SvnCheckResult {
                ok: false,
                revision: None,
                message: Some(e.to_string()),
                duration_ms,
                checked_at: now_string(),
            },
        }
    }

    /// Re-read the latest revision of a resource and record it
    pub async fn refresh(&self, resource_id: &str) -> Result<SvnResource, DeployError> {
        let mut resource = self.load(resource_id).await?;
        let password = self.password_for(&resource).await?;
        let auth = Auth {
            username: &resource.username,
            password: password.as_ref(),
        };
        match self.info(&resource.url, None, &auth).await {
            Ok(revision) => {
                resource.revision = revision;
                self.mark(&mut resource, ResourceStatus::Online).await;
                Ok(resource)
            }
            Err(e) => {
                self.mark(&mut resource, ResourceStatus::Error).await;
                Err(e)
            }
        }
    }

    async fn sync_impl(
        &self,
        resource: &mut SvnResource,
        target_revision: Option<&str>,
        staging: &Path,
    ) -> Result<SyncOutcome, DeployError> {
        let password = self.password_for(resource).await?;
        let auth = Auth {
            username: &resource.username,
            password: password.as_ref(),
        };

        let requested = normalize_revision(target_revision);
        let revision = match requested {
            Some(rev) => {
                self.info(&resource.url, Some(&rev), &auth).await?;
                rev
            }
            None => self.info(&resource.url, None, &auth).await?,
        };

        let name = resource
            .artifact_name()
            .unwrap_or_else(|| EXPORT_DIR_NAME.to_string());
        let artifact: PathBuf = staging.join(name);

        match resource.resource_type {
            ResourceType::File => {
                self.cat_to_file(&resource.url, &revision, &artifact, &auth)
                    .await?
            }
            ResourceType::Folder => {
                tokio::fs::create_dir_all(staging).await?;
                self.export(&resource.url, &revision, &artifact, &auth).await?
            }
        }

        let size_bytes = tree_size(&artifact).await?;
        Ok(SyncOutcome {
            revision,
            size_bytes,
            artifact,
        })
    }
}

#[async_trait]
impl SvnMirror for SvnCli {
    async fn sync(
        &self,
        resource_id: &str,
        target_revision: Option<&str>,
        staging: &Path,
    ) -> Result<SyncOutcome, DeployError> {
        let mut resource = self.load(resource_id).await?;
        info!(
            resource = %resource.id,
            url = %resource.url,
            "Mirroring SVN resource into {}",
            staging.display()
        );
        self.mark(&mut resource, ResourceStatus::Syncing).await;

        match self.sync_impl(&mut resource, target_revision, staging).await {
            Ok(outcome) => {
                resource.revision = outcome.revision.clone();
                resource.size = human_size(outcome.size_bytes);
                self.mark(&mut resource, ResourceStatus::Online).await;
                info!(
                    resource = %resource.id,
                    revision = %outcome.revision,
                    "SVN resource mirrored ({})",
                    resource.size
                );
                Ok(outcome)
            }
            Err(e) => {
                self.mark(&mut resource, ResourceStatus::Error).await;
                Err(e)
            }
        }
    }
}
