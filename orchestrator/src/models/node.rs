//! Node (server) models

use serde::{Deserialize, Serialize};

/// File transfer protocol used to push content to a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Sftp,
    Ftp,
    Scp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Sftp => "SFTP",
            Protocol::Ftp => "FTP",
            Protocol::Scp => "SCP",
        };
        f.write_str(name)
    }
}

/// How the orchestrator authenticates to a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
    Agent,
}

/// Username used when a node does not name one
pub const DEFAULT_USERNAME: &str = "root";

/// A deployment target host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_path: String,
}

impl Node {
    /// Username for remote sessions, falling back to `root`
    pub fn login(&self) -> &str {
        if self.username.trim().is_empty() {
            DEFAULT_USERNAME
        } else {
            self.username.trim()
        }
    }

    /// Name used in run logs; the IP when the node is unnamed
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.ip
        } else {
            &self.name
        }
    }
}

/// Result of a single connectivity probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub node_id: String,
    pub reachable: bool,
    pub latency_ms: u64,
    pub checked_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Master plus slaves, as shown in the topology view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub master: Option<Node>,
    pub slaves: Vec<Node>,
    pub total: usize,
}
