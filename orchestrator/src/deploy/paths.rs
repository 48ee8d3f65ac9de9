//! Remote path resolution

use std::collections::BTreeMap;

use crate::models::task::TaskDefinition;

/// Master target directory; blank falls back to `default_path`
pub fn master_path(task: &TaskDefinition, default_path: &str) -> String {
    normalize(non_blank(&task.remote_path).unwrap_or(default_path))
}

/// Target directory for one slave.
///
/// Precedence: per-slave entry in `slaveRemotePaths`, then the uniform
/// `slaveRemotePath`, then the master path.
pub fn resolve_slave_path(task: &TaskDefinition, slave_id: &str, default_path: &str) -> String {
    resolve_with(
        &task.slave_remote_paths,
        &task.slave_remote_path,
        &task.remote_path,
        slave_id,
        default_path,
    )
}

fn resolve_with(
    per_slave: &BTreeMap<String, String>,
    uniform: &str,
    master: &str,
    slave_id: &str,
    default_path: &str,
) -> String {
    let chosen = per_slave
        .get(slave_id)
        .and_then(|p| non_blank(p))
        .or_else(|| non_blank(uniform))
        .or_else(|| non_blank(master))
        .unwrap_or(default_path);
    normalize(chosen)
}

/// Where the staged artifact lands: `<dir>/<name>` for a file, `<dir>` for
/// a folder
pub fn push_target(dir: &str, file_name: Option<&str>) -> String {
    match file_name {
        Some(name) if dir == "/" => format!("/{}", name),
        Some(name) => format!("{}/{}", dir, name),
        None => dir.to_string(),
    }
}

fn non_blank(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() && trimmed.starts_with('/') {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}
