use super::kubectl::Kubectl;
use super::rebuild::{self, LocalBuild};
use super::runtime::{self, DetectedRuntime, RestartMode};
use super::wrapper::{self, PID_FILE, WRAPPER_MARKER};
use crate::settings::SyncSettings;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Inputs of one sync session
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub deployment: String,
    pub namespace: String,
    pub src: PathBuf,
    pub dest: String,
    pub container: Option<String>,
    pub restart: bool,
}

impl SyncOptions {
    pub fn default_dest() -> &'static str {
        "/app"
    }
}

/// Everything `prepare` resolved: the strategy, the pod, and the rollback
/// point for teardown.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub detected: DetectedRuntime,
    pub pod: String,
    pub container: String,
    pub distroless: bool,
    /// Whether this session patched the wrapper in (drives teardown)
    pub wrapper_applied: bool,
    /// Rollout revision before the session touched anything
    pub revision_snapshot: String,
    pub local_build: Option<LocalBuild>,
}

/// The sync engine: make running pods behave as if their image had been
/// rebuilt from the local sources, without a rebuild when the runtime
/// allows it.
pub struct SyncEngine {
    pub options: SyncOptions,
    kubectl: Kubectl,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(options: SyncOptions, settings: SyncSettings) -> Self {
        let kubectl = Kubectl::new(options.namespace.clone());
        Self {
            options,
            kubectl,
            settings,
        }
    }

    pub fn kubectl(&self) -> &Kubectl {
        &self.kubectl
    }

    async fn resolve_container(&self) -> Result<String> {
        if let Some(container) = &self.options.container {
            return Ok(container.clone());
        }
        let deploy = self.kubectl.get_deployment(&self.options.deployment).await?;
        deploy
            .pointer("/spec/template/spec/containers/0/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("deployment has no containers")
    }

    /// Read PID 1's command line. Shell-less containers can't `cat`, so the
    /// deployment spec's command/args are the fallback.
    async fn read_cmdline(&self, pod: &str, container: &str) -> Result<Vec<u8>> {
        match self
            .kubectl
            .exec(pod, Some(container), &["cat", "/proc/1/cmdline"])
            .await
        {
            Ok(out) => Ok(out.into_bytes()),
            Err(e) => {
                debug!("cmdline read failed ({}), falling back to pod spec", e);
                let deploy = self.kubectl.get_deployment(&self.options.deployment).await?;
                let containers = deploy
                    .pointer("/spec/template/spec/containers")
                    .and_then(Value::as_array)
                    .context("deployment has no containers")?;
                let spec = containers
                    .iter()
                    .find(|c| c.pointer("/name").and_then(Value::as_str) == Some(container))
                    .context("container not found in deployment spec")?;
                let mut tokens: Vec<String> = Vec::new();
                for key in ["command", "args"] {
                    if let Some(list) = spec.get(key).and_then(Value::as_array) {
                        tokens.extend(
                            list.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string),
                        );
                    }
                }
                if tokens.is_empty() {
                    bail!("cannot determine command of container {}", container);
                }
                Ok(tokens.join("\u{0}").into_bytes())
            }
        }
    }

    /// A container without a working shell needs the debug-tools injection
    async fn probe_shell(&self, pod: &str, container: &str) -> bool {
        matches!(
            self.kubectl
                .exec(pod, Some(container), &["sh", "-c", "echo ok"])
                .await,
            Ok(out) if out.trim() == "ok"
        )
    }

    async fn wrapper_present(&self, pod: &str, container: &str) -> bool {
        self.kubectl
            .exec(pod, Some(container), &["ls", WRAPPER_MARKER])
            .await
            .is_ok()
    }

    /// Detect the runtime of the target container (used directly by the
    /// dashboard's runtime endpoint).
    pub async fn detect_runtime(&self) -> Result<(DetectedRuntime, String, String)> {
        let container = self.resolve_container().await?;
        let pod = self.kubectl.find_pod(&self.options.deployment).await?;
        let raw = self.read_cmdline(&pod, &container).await?;
        let detected = runtime::detect(&raw, Some(self.options.src.as_path()));
        Ok((detected, pod, container))
    }

    /// Resolve the full plan: detection, wrapper patching (single rollout)
    /// and the local build command for rebuild-mode runtimes.
    pub async fn prepare(&self) -> Result<SyncPlan> {
        let revision_snapshot = self.kubectl.revision(&self.options.deployment).await?;
        let (detected, pod, container) = self.detect_runtime().await?;
        info!(
            "detected runtime '{}' (mode {:?}) in {}/{}",
            detected.runtime,
            detected.mode(),
            self.options.namespace,
            self.options.deployment
        );

        let mut plan = SyncPlan {
            pod,
            container,
            distroless: false,
            wrapper_applied: false,
            revision_snapshot,
            local_build: None,
            detected,
        };

        match plan.detected.mode() {
            RestartMode::Kill => {
                self.ensure_wrapper(&mut plan).await?;
            }
            RestartMode::Rebuild => {
                let (target_os, target_arch) = self.kubectl.node_os_arch().await?;
                let out_dir =
                    std::env::temp_dir().join(format!("kindling-sync-{}", self.options.deployment));
                std::fs::create_dir_all(&out_dir)?;
                let language = plan
                    .detected
                    .profile
                    .as_ref()
                    .map(|p| p.language)
                    .unwrap_or("unknown");
                plan.local_build = Some(rebuild::compose_local_build(
                    language,
                    &self.options.src,
                    &target_os,
                    &target_arch,
                    &out_dir,
                )?);
                self.ensure_wrapper(&mut plan).await?;
            }
            _ => {}
        }

        Ok(plan)
    }

    /// Patch the restart wrapper in (with the distroless extension when the
    /// container has no shell), wait for the rollout, and re-discover the
    /// pod. Everything lands in one patch so there is a single rollout.
    async fn ensure_wrapper(&self, plan: &mut SyncPlan) -> Result<()> {
        plan.distroless = !self.probe_shell(&plan.pod, &plan.container).await;
        if !plan.distroless && self.wrapper_present(&plan.pod, &plan.container).await {
            debug!("wrapper already present in {}", plan.pod);
            return Ok(());
        }

        let original = if plan.detected.command.is_empty() {
            bail!("cannot wrap container with unknown command");
        } else {
            plan.detected.command.clone()
        };
        info!(
            "patching restart wrapper into {} (distroless: {})",
            self.options.deployment, plan.distroless
        );
        let patch = wrapper::wrapper_patch(&plan.container, &original, plan.distroless);
        self.kubectl
            .patch_deployment(&self.options.deployment, &patch)
            .await?;
        self.kubectl
            .rollout_status(&self.options.deployment, self.settings.rollout_timeout_secs)
            .await?;
        plan.pod = self.kubectl.find_pod(&self.options.deployment).await?;
        plan.wrapper_applied = true;
        Ok(())
    }

    /// Copy the changed files (or the whole tree) and run the strategy's
    /// restart step. Each flush re-discovers the pod in case a rollout
    /// replaced it.
    pub async fn flush(&self, plan: &mut SyncPlan, changed: Option<&[PathBuf]>) -> Result<()> {
        plan.pod = self.kubectl.find_pod(&self.options.deployment).await?;

        match plan.detected.mode() {
            RestartMode::None => {
                self.copy_sources(plan, changed).await?;
            }
            RestartMode::Signal => {
                self.copy_sources(plan, changed).await?;
                if self.options.restart {
                    self.signal_or_kill(plan).await?;
                }
            }
            RestartMode::Kill => {
                self.copy_sources(plan, changed).await?;
                if self.options.restart {
                    self.kill_child(plan).await?;
                }
            }
            RestartMode::Rebuild => {
                self.rebuild_and_swap(plan).await?;
            }
            RestartMode::FrontendBuild => {
                self.frontend_build(plan).await?;
            }
        }
        Ok(())
    }

    async fn copy_sources(&self, plan: &SyncPlan, changed: Option<&[PathBuf]>) -> Result<()> {
        match changed {
            None => {
                self.kubectl
                    .copy_dir(
                        &plan.pod,
                        Some(&plan.container),
                        &self.options.src,
                        &self.options.dest,
                    )
                    .await
            }
            Some(paths) => {
                for path in paths {
                    let Ok(relative) = path.strip_prefix(&self.options.src) else {
                        continue;
                    };
                    let remote = format!(
                        "{}/{}",
                        self.options.dest.trim_end_matches('/'),
                        relative.to_string_lossy()
                    );
                    self.kubectl
                        .copy_file(&plan.pod, Some(&plan.container), path, &remote)
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Signal PID 1; when that fails, fall back to the kill strategy
    async fn signal_or_kill(&self, plan: &mut SyncPlan) -> Result<()> {
        let signal = plan
            .detected
            .profile
            .as_ref()
            .and_then(|p| p.signal)
            .unwrap_or("HUP");
        let result = self
            .kubectl
            .exec(
                &plan.pod,
                Some(&plan.container),
                &["kill", &format!("-{}", signal), "1"],
            )
            .await;
        if let Err(e) = result {
            warn!("signal reload failed ({}), falling back to process kill", e);
            self.ensure_wrapper(plan).await?;
            self.kill_child(plan).await?;
        }
        Ok(())
    }

    /// Kill the wrapper's child; the wrapper loop respawns it with the
    /// freshly synced files.
    async fn kill_child(&self, plan: &SyncPlan) -> Result<()> {
        self.kubectl
            .exec(
                &plan.pod,
                Some(&plan.container),
                &["sh", "-c", &format!("kill $(cat {})", PID_FILE)],
            )
            .await
            .map(|_| ())
            .context("failed to kill wrapped process")?;
        if let Some(profile) = &plan.detected.profile {
            if profile.wait_after > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(profile.wait_after)).await;
            }
        }
        Ok(())
    }

    /// Cross-compile locally and copy the binary over the path the container
    /// resolves for its own entrypoint.
    async fn rebuild_and_swap(&self, plan: &SyncPlan) -> Result<()> {
        let build = plan
            .local_build
            .as_ref()
            .context("rebuild plan missing local build")?;
        rebuild::run_local_build(build, &self.options.src).await?;

        let inner_first = plan
            .detected
            .command
            .split_whitespace()
            .next()
            .context("wrapped command is empty")?;
        let base = inner_first.rsplit('/').next().unwrap_or(inner_first);

        // Where does the container itself find the binary?
        let resolved = self
            .kubectl
            .exec(
                &plan.pod,
                Some(&plan.container),
                &["sh", "-c", &format!("command -v {}", base)],
            )
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default();
        let remote_path = if resolved.is_empty() {
            inner_first.to_string()
        } else {
            resolved
        };

        info!("copying rebuilt binary over {}", remote_path);
        self.kubectl
            .copy_file(&plan.pod, Some(&plan.container), &build.artifact, &remote_path)
            .await?;
        self.kubectl
            .exec(
                &plan.pod,
                Some(&plan.container),
                &["chmod", "+x", &remote_path],
            )
            .await?;
        self.kill_child(plan).await
    }

    /// Rebuild the frontend bundle locally and copy it over the static root
    async fn frontend_build(&self, plan: &SyncPlan) -> Result<()> {
        let src = &self.options.src;
        let package_manager = if src.join("pnpm-lock.yaml").exists() {
            "pnpm"
        } else if src.join("yarn.lock").exists() {
            "yarn"
        } else {
            "npm"
        };

        if !src.join("node_modules").exists() {
            info!("installing frontend dependencies with {}", package_manager);
            run_in_dir(src, &format!("{} install", package_manager)).await?;
        }
        run_in_dir(src, &format!("{} run build", package_manager)).await?;

        let out_dir = ["dist", "build", "out", ".output/public"]
            .iter()
            .map(|d| src.join(d))
            .find(|p| p.is_dir())
            .context("no build output directory found (tried dist, build, out)")?;

        // Ask the server where its static root is; default to the stock
        // nginx html root.
        let root = self
            .kubectl
            .exec(
                &plan.pod,
                Some(&plan.container),
                &[
                    "sh",
                    "-c",
                    "nginx -T 2>/dev/null | grep -m1 'root ' | awk '{print $2}' | tr -d ';'",
                ],
            )
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default();
        let root = if root.is_empty() {
            "/usr/share/nginx/html".to_string()
        } else {
            root
        };

        info!("copying {} to {}:{}", out_dir.display(), plan.pod, root);
        self.kubectl
            .copy_dir(&plan.pod, Some(&plan.container), &out_dir, &root)
            .await
    }

    /// Undo the session: rollback to the pre-sync revision when this session
    /// patched the wrapper in, otherwise force a fresh pod from the
    /// unpatched image.
    pub async fn teardown(&self, plan: &SyncPlan) -> Result<()> {
        let current = self.kubectl.revision(&self.options.deployment).await?;
        if current != plan.revision_snapshot && plan.wrapper_applied {
            info!(
                "rolling {} back to revision {}",
                self.options.deployment, plan.revision_snapshot
            );
            self.kubectl
                .rollout_undo(&self.options.deployment, &plan.revision_snapshot)
                .await?;
        } else {
            info!("restarting {} to drop synced state", self.options.deployment);
            self.kubectl.rollout_restart(&self.options.deployment).await?;
        }
        self.kubectl
            .rollout_status(&self.options.deployment, self.settings.rollout_timeout_secs)
            .await
    }
}

async fn run_in_dir(dir: &Path, command: &str) -> Result<()> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to spawn '{}'", command))?;
    if !output.status.success() {
        bail!(
            "'{}' failed:\n{}\n{}",
            command,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Dashboard-facing string for a restart mode
pub fn mode_str(mode: RestartMode) -> &'static str {
    match mode {
        RestartMode::None => "none",
        RestartMode::Signal => "signal",
        RestartMode::Kill => "kill",
        RestartMode::Rebuild => "rebuild",
        RestartMode::FrontendBuild => "frontend-build",
    }
}

/// Human description of what a flush does for this mode
pub fn strategy_str(mode: RestartMode) -> &'static str {
    match mode {
        RestartMode::None => "copy files; host re-reads them on every request",
        RestartMode::Signal => "copy files, then signal PID 1 to reload",
        RestartMode::Kill => "copy files, then kill the wrapped process so it respawns",
        RestartMode::Rebuild => "cross-compile locally and swap the binary",
        RestartMode::FrontendBuild => "build the bundle locally and copy it over the static root",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_strings() {
        assert_eq!(mode_str(RestartMode::Kill), "kill");
        assert_eq!(mode_str(RestartMode::FrontendBuild), "frontend-build");
        assert!(strategy_str(RestartMode::Rebuild).contains("cross-compile"));
    }

    #[test]
    fn test_default_dest() {
        assert_eq!(SyncOptions::default_dest(), "/app");
    }
}
