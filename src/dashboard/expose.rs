use super::workspace;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Descriptor persisted under `.kindling/tunnel.json` so the UI can show the
/// tunnel across dashboard restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelDescriptor {
    pub command: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// A running tunnel process. Provider-specific behavior lives entirely in
/// the configured command line; kindling only supervises the process.
pub struct TunnelHandle {
    pub descriptor: TunnelDescriptor,
    child: Child,
    state_path: PathBuf,
}

impl TunnelHandle {
    /// Spawn the configured tunnel command with `{port}` substituted
    pub async fn start(repo_root: &Path, command_template: &str, port: u16) -> Result<Self> {
        if command_template.trim().is_empty() {
            bail!("no tunnel command configured (set expose.tunnel_command)");
        }
        let command = command_template.replace("{port}", &port.to_string());
        info!("starting tunnel: {}", command);
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start tunnel '{}'", command))?;

        let descriptor = TunnelDescriptor {
            command,
            port,
            pid: child.id(),
            started_at: Utc::now(),
        };
        let state_path = workspace::tunnel_descriptor_path(repo_root);
        workspace::write_state(&state_path, &descriptor)?;

        Ok(Self {
            descriptor,
            child,
            state_path,
        })
    }

    /// Kill the tunnel and drop the descriptor
    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("failed to kill tunnel process: {}", e);
        }
        let _ = self.child.wait().await;
        workspace::remove_state(&self.state_path);
        info!("tunnel stopped");
    }
}
