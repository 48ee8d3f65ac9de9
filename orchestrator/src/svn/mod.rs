//! SVN mirror: fetches a resource at a concrete revision into a staging area

pub mod client;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::DeployError;

pub use client::SvnCli;

/// Result of mirroring a resource into a staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Concrete revision fetched, even when "latest" was requested
    pub revision: String,
    pub size_bytes: u64,
    /// The staged file (file resources) or directory (folder resources)
    pub artifact: PathBuf,
}

#[async_trait]
pub trait SvnMirror: Send + Sync {
    /// Export `resource_id` at `target_revision` (latest when `None`) into
    /// `staging`. Repeating the call for the same revision yields the same
    /// outcome.
    async fn sync(
        &self,
        resource_id: &str,
        target_revision: Option<&str>,
        staging: &Path,
    ) -> Result<SyncOutcome, DeployError>;
}

/// `None` for the symbolic "latest" spellings (`""`, `"0"`, `"HEAD"`)
pub fn normalize_revision(revision: Option<&str>) -> Option<String> {
    let rev = revision?.trim();
    if rev.is_empty() || rev == "0" || rev.eq_ignore_ascii_case("head") {
        return None;
    }
    Some(rev.trim_start_matches('r').to_string())
}

/// Map svn client stderr onto the error taxonomy
pub fn classify_failure(action: &str, message: &str) -> DeployError {
    let lower = message.to_lowercase();
    let auth = ["e170001", "e215004", "authorization failed", "authentication failed"]
        .iter()
        .any(|marker| lower.contains(marker));
    if auth {
        DeployError::AuthError(format!("svn {} failed: {}", action, message))
    } else {
        DeployError::SyncError(format!("svn {} failed: {}", action, message))
    }
}
