//! Directory operations

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::utils::hex;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), DeployError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Create a temporary directory
    pub async fn create_temp_dir(prefix: &str) -> Result<Dir, DeployError> {
        let temp_dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir).await?;
        Ok(Dir::new(temp_dir))
    }
}

/// Every regular file below `root` (or `root` itself when it is a file),
/// as paths relative to `root`, sorted.
pub async fn walk_files(root: &Path) -> Result<Vec<PathBuf>, DeployError> {
    let meta = fs::metadata(root).await?;
    if meta.is_file() {
        return Ok(vec![PathBuf::new()]);
    }

    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        let mut entries = fs::read_dir(root.join(&rel)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let child = rel.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn resolve(root: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

/// Total size in bytes of the file or tree at `root`
pub async fn tree_size(root: &Path) -> Result<u64, DeployError> {
    let mut total = 0;
    for rel in walk_files(root).await? {
        total += fs::metadata(resolve(root, &rel)).await?.len();
    }
    Ok(total)
}

/// Content digest of the file or tree at `root`.
///
/// Covers relative paths and file bytes, so a rename changes the digest as
/// well as an edit.
pub async fn tree_digest(root: &Path) -> Result<String, DeployError> {
    let mut hasher = Sha256::new();
    for rel in walk_files(root).await? {
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let bytes = fs::read(resolve(root, &rel)).await?;
        hasher.update(Sha256::digest(&bytes));
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
