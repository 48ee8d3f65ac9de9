//! API models
//!
//! Entity payloads (tasks, runs, nodes, resources) are served in their
//! stored shape; this module holds the envelopes around them.

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable class, e.g. `not_found` or `conflict`
    pub error: String,
    pub message: String,
}

/// Start run request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// Revision to deploy; latest when absent
    #[serde(default)]
    pub revision: Option<String>,
}

/// Optional display name for template capture and instantiation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Count of deleted records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

/// Store secrets for a node or SVN resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCredentialRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Persist across restarts; otherwise held for this process only
    #[serde(default)]
    pub remember: bool,
}

/// Which secrets are stored; never the secrets themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatusResponse {
    pub subject_id: String,
    pub username: String,
    pub has_password: bool,
    pub has_passphrase: bool,
}

/// Probe with credentials other than the stored ones
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Repository connection test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvnCheckRequest {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}
