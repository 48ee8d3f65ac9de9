//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Orchestrator settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the data directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Engine configuration
    #[serde(default)]
    pub engine: EngineSettings,

    /// Background connectivity prober
    #[serde(default)]
    pub prober: ProberSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            prober: ProberSettings::default(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed to call the API from a browser; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8340
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum nodes worked on concurrently within one run
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Upper bound for one node's connection, transfer and commands
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    /// Upper bound for one svn invocation
    #[serde(default = "default_svn_timeout")]
    pub svn_timeout_secs: u64,

    /// SSH connect timeout handed to the ssh client
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Remote path used when a task leaves it blank
    #[serde(default = "default_remote_path")]
    pub default_remote_path: String,

    #[serde(default = "default_svn_binary")]
    pub svn_binary: String,

    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    #[serde(default = "default_scp_binary")]
    pub scp_binary: String,

    #[serde(default = "default_sftp_binary")]
    pub sftp_binary: String,

    #[serde(default = "default_curl_binary")]
    pub curl_binary: String,

    #[serde(default = "default_sshpass_binary")]
    pub sshpass_binary: String,
}

fn default_worker_limit() -> usize {
    8
}

fn default_node_timeout() -> u64 {
    600
}

fn default_svn_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_remote_path() -> String {
    "/tmp/deploymaster".to_string()
}

fn default_svn_binary() -> String {
    "svn".to_string()
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_scp_binary() -> String {
    "scp".to_string()
}

fn default_sftp_binary() -> String {
    "sftp".to_string()
}

fn default_curl_binary() -> String {
    "curl".to_string()
}

fn default_sshpass_binary() -> String {
    "sshpass".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
            node_timeout_secs: default_node_timeout(),
            svn_timeout_secs: default_svn_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            default_remote_path: default_remote_path(),
            svn_binary: default_svn_binary(),
            ssh_binary: default_ssh_binary(),
            scp_binary: default_scp_binary(),
            sftp_binary: default_sftp_binary(),
            curl_binary: default_curl_binary(),
            sshpass_binary: default_sshpass_binary(),
        }
    }
}

/// Background prober settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProberSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
}

fn default_probe_interval() -> u64 {
    60
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_probe_interval(),
        }
    }
}
