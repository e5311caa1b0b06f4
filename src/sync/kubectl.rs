use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use super::wrapper::shell_quote;

/// Thin wrappers around `kubectl` for the operations the sync engine needs:
/// exec, tar-based copy, rollout control and node inspection.
#[derive(Debug, Clone)]
pub struct Kubectl {
    pub namespace: String,
}

impl Kubectl {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("kubectl -n {} {}", self.namespace, args.join(" "));
        let output = Command::new("kubectl")
            .arg("-n")
            .arg(&self.namespace)
            .args(args)
            .output()
            .await
            .context("failed to spawn kubectl")?;
        if !output.status.success() {
            bail!(
                "kubectl {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Execute a command in a container and return combined stdout
    pub async fn exec(&self, pod: &str, container: Option<&str>, cmd: &[&str]) -> Result<String> {
        let mut args = vec!["exec", pod];
        if let Some(container) = container {
            args.push("-c");
            args.push(container);
        }
        args.push("--");
        args.extend_from_slice(cmd);
        self.run(&args).await
    }

    /// Copy a local directory's contents into a directory inside the
    /// container by piping tar through `kubectl exec -i`.
    pub async fn copy_dir(
        &self,
        pod: &str,
        container: Option<&str>,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        let container_flag = container
            .map(|c| format!("-c {}", shell_quote(c)))
            .unwrap_or_default();
        let pipeline = format!(
            "tar cf - -C {local} . | kubectl -n {ns} exec -i {flag} {pod} -- tar xf - -C {remote}",
            local = shell_quote(&local.to_string_lossy()),
            ns = shell_quote(&self.namespace),
            flag = container_flag,
            pod = shell_quote(pod),
            remote = shell_quote(remote),
        );
        self.run_shell(&pipeline).await
    }

    /// Copy a single local file to an absolute path inside the container
    pub async fn copy_file(
        &self,
        pod: &str,
        container: Option<&str>,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        let parent = local.parent().unwrap_or_else(|| Path::new("."));
        let file_name = local
            .file_name()
            .context("local path has no file name")?
            .to_string_lossy()
            .to_string();
        let remote_dir = Path::new(remote)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let remote_name = Path::new(remote)
            .file_name()
            .context("remote path has no file name")?
            .to_string_lossy()
            .to_string();

        let container_flag = container
            .map(|c| format!("-c {}", shell_quote(c)))
            .unwrap_or_default();
        let pipeline = format!(
            "tar cf - -C {parent} {file} | kubectl -n {ns} exec -i {flag} {pod} -- \
             sh -c {script}",
            parent = shell_quote(&parent.to_string_lossy()),
            file = shell_quote(&file_name),
            ns = shell_quote(&self.namespace),
            flag = container_flag,
            pod = shell_quote(pod),
            script = shell_quote(&format!(
                "tar xf - -C {dir} && if [ {file} != {name} ]; then mv {dir}/{file} {dir}/{name}; fi",
                dir = shell_quote(&remote_dir),
                file = shell_quote(&file_name),
                name = shell_quote(&remote_name),
            )),
        );
        self.run_shell(&pipeline).await
    }

    async fn run_shell(&self, pipeline: &str) -> Result<()> {
        debug!("sh -c {}", pipeline);
        let output = Command::new("sh")
            .arg("-c")
            .arg(pipeline)
            .output()
            .await
            .context("failed to spawn copy pipeline")?;
        if !output.status.success() {
            bail!(
                "copy pipeline failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Find a running pod of the deployment via its selector labels
    pub async fn find_pod(&self, deployment: &str) -> Result<String> {
        let deploy = self.get_deployment(deployment).await?;
        let selector = deploy
            .pointer("/spec/selector/matchLabels")
            .and_then(Value::as_object)
            .context("deployment has no selector")?;
        let label_arg = selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.as_str().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        let out = self
            .run(&[
                "get",
                "pods",
                "-l",
                &label_arg,
                "--field-selector=status.phase=Running",
                "-o",
                "jsonpath={.items[0].metadata.name}",
            ])
            .await?;
        let pod = out.trim().to_string();
        if pod.is_empty() {
            bail!("no running pod found for deployment {}", deployment);
        }
        Ok(pod)
    }

    pub async fn get_deployment(&self, name: &str) -> Result<Value> {
        let out = self.run(&["get", "deployment", name, "-o", "json"]).await?;
        serde_json::from_str(&out).context("failed to parse deployment JSON")
    }

    /// Current rollout revision of the deployment
    pub async fn revision(&self, deployment: &str) -> Result<String> {
        let out = self
            .run(&[
                "get",
                "deployment",
                deployment,
                "-o",
                "jsonpath={.metadata.annotations.deployment\\.kubernetes\\.io/revision}",
            ])
            .await?;
        Ok(out.trim().to_string())
    }

    pub async fn patch_deployment(&self, name: &str, patch: &Value) -> Result<()> {
        let patch_json = serde_json::to_string(patch)?;
        self.run(&[
            "patch",
            "deployment",
            name,
            "--type=strategic",
            "-p",
            &patch_json,
        ])
        .await?;
        Ok(())
    }

    pub async fn rollout_status(&self, deployment: &str, timeout_secs: u64) -> Result<()> {
        self.run(&[
            "rollout",
            "status",
            &format!("deployment/{}", deployment),
            &format!("--timeout={}s", timeout_secs),
        ])
        .await?;
        Ok(())
    }

    pub async fn rollout_undo(&self, deployment: &str, revision: &str) -> Result<()> {
        self.run(&[
            "rollout",
            "undo",
            &format!("deployment/{}", deployment),
            &format!("--to-revision={}", revision),
        ])
        .await?;
        Ok(())
    }

    pub async fn rollout_restart(&self, deployment: &str) -> Result<()> {
        self.run(&["rollout", "restart", &format!("deployment/{}", deployment)])
            .await?;
        Ok(())
    }

    /// `(operatingSystem, architecture)` of the first node, which is the
    /// whole cluster on a single-node dev setup.
    pub async fn node_os_arch(&self) -> Result<(String, String)> {
        let out = self
            .run(&[
                "get",
                "nodes",
                "-o",
                "jsonpath={.items[0].status.nodeInfo.operatingSystem} \
                 {.items[0].status.nodeInfo.architecture}",
            ])
            .await?;
        let mut parts = out.split_whitespace();
        let os = parts.next().unwrap_or("linux").to_string();
        let arch = parts.next().unwrap_or("amd64").to_string();
        Ok((os, arch))
    }
}
