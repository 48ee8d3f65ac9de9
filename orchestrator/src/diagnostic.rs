//! `--diagnostic`: report which external tools the engine can reach

use std::process::Stdio;

use colored::Colorize;
use tokio::process::Command;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::EngineSettings;

/// One external binary check
#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub name: &'static str,
    pub binary: String,
    pub found: bool,
    /// First line of the tool's version output
    pub detail: Option<String>,
}

async fn check_tool(name: &'static str, binary: &str, version_arg: &str) -> ToolCheck {
    let output = Command::new(binary)
        .arg(version_arg)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(output) => {
            // ssh prints its version on stderr
            let text = if output.stdout.is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            let detail = String::from_utf8_lossy(&text)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string);
            ToolCheck {
                name,
                binary: binary.to_string(),
                found: true,
                detail,
            }
        }
        Err(_) => ToolCheck {
            name,
            binary: binary.to_string(),
            found: false,
            detail: None,
        },
    }
}

/// Check every binary the engine shells out to
pub async fn check_tools(engine: &EngineSettings) -> Vec<ToolCheck> {
    vec![
        check_tool("svn", &engine.svn_binary, "--version").await,
        check_tool("ssh", &engine.ssh_binary, "-V").await,
        check_tool("scp", &engine.scp_binary, "-V").await,
        check_tool("sftp", &engine.sftp_binary, "-V").await,
        check_tool("curl", &engine.curl_binary, "--version").await,
        check_tool("sshpass", &engine.sshpass_binary, "-V").await,
    ]
}

/// Print the diagnostic report; returns whether svn and ssh are usable
pub async fn run_diagnostic(engine: &EngineSettings, layout: &StorageLayout) -> bool {
    println!("{}", "DeployMaster diagnostic".bold());
    println!("  data dir: {}", layout.base_dir.display());

    let checks = check_tools(engine).await;
    for check in &checks {
        let status = if check.found {
            "ok".green()
        } else {
            "missing".red()
        };
        println!(
            "  {:<8} {:<8} {} {}",
            check.name,
            status,
            check.binary,
            check.detail.as_deref().unwrap_or("").dimmed()
        );
    }

    let required = checks
        .iter()
        .filter(|c| c.name == "svn" || c.name == "ssh")
        .all(|c| c.found);
    if !required {
        println!("{}", "svn and ssh are required to run deployments".yellow());
    }
    required
}
