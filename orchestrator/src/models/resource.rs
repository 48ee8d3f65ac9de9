//! SVN resource models

use serde::{Deserialize, Serialize};

/// Whether the resource URL points at a single file or a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    #[default]
    Folder,
}

/// Mirror state of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    #[default]
    Online,
    Error,
    Syncing,
}

/// Fallback artifact name for file resources whose URL has no usable basename
pub const FALLBACK_FILE_NAME: &str = "package.bin";

/// A centrally versioned source artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvnResource {
    #[serde(default)]
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub last_checked: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl SvnResource {
    /// Last path segment of the URL, used as the staged and remote name
    pub fn base_name(&self) -> Option<String> {
        let parsed = url::Url::parse(self.url.trim()).ok();
        let segment = match &parsed {
            Some(url) => url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string),
            None => self
                .url
                .trim()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(str::to_string),
        };
        segment.filter(|s| !s.is_empty() && s != "." && s != "/")
    }

    /// Name of the staged artifact: the URL basename, or `package.bin` for
    /// file resources without one
    pub fn artifact_name(&self) -> Option<String> {
        match (self.resource_type, self.base_name()) {
            (_, Some(name)) => Some(name),
            (ResourceType::File, None) => Some(FALLBACK_FILE_NAME.to_string()),
            (ResourceType::Folder, None) => None,
        }
    }
}

/// Outcome of a connection check against a repository URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvnCheckResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    pub checked_at: String,
}
