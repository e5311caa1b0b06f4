use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const KANIKO_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";

/// Exit code reported when a build exceeds its timeout
pub const EXIT_TIMEOUT: i32 = 124;

/// Parameters of one Kaniko build request
pub struct KanikoBuild<'a> {
    /// Request name; the pod is `kaniko-<name>`
    pub name: &'a str,
    /// Fully qualified destination image reference
    pub dest: &'a str,
    /// Dockerfile path relative to the context, when not `Dockerfile`
    pub dockerfile: Option<String>,
    /// Build context tarball, piped to the executor's stdin
    pub context_tar: &'a Path,
    /// Cache repository inside the cluster registry
    pub cache_repo: &'a str,
    pub timeout: Duration,
}

fn pod_name(name: &str) -> String {
    format!("kaniko-{}", name)
}

/// Delete a stale executor pod left behind by an earlier crash, so the
/// one-shot pod name is free again.
pub async fn delete_stale_pod(name: &str) -> Result<()> {
    let status = Command::new("kubectl")
        .args([
            "delete",
            "pod",
            &pod_name(name),
            "--ignore-not-found=true",
            "--wait=true",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .context("failed to spawn kubectl delete")?;
    if !status.success() {
        warn!("stale kaniko pod cleanup for {} exited non-zero", name);
    }
    Ok(())
}

/// Run a one-shot Kaniko executor pod, piping the context tarball into its
/// stdin and the combined output into `log`. Returns the exit code; the
/// caller owns writing it to the `.exitcode` file.
pub async fn run_build(build: &KanikoBuild<'_>, log: File) -> Result<i32> {
    let pod = pod_name(build.name);
    info!("starting kaniko build {} -> {}", pod, build.dest);

    let stdin = File::open(build.context_tar)
        .with_context(|| format!("build context {} missing", build.context_tar.display()))?;
    let stderr = log.try_clone().context("failed to clone log handle")?;

    let mut cmd = Command::new("kubectl");
    cmd.args([
        "run",
        &pod,
        "--rm",
        "-i",
        "--restart=Never",
        &format!("--image={}", KANIKO_IMAGE),
        "--",
        "--context=tar://stdin",
    ])
    .arg(format!("--destination={}", build.dest));
    if let Some(dockerfile) = &build.dockerfile {
        cmd.arg(format!("--dockerfile={}", dockerfile));
    }
    cmd.arg("--insecure")
        .arg("--cache=true")
        .arg(format!("--cache-repo={}", build.cache_repo))
        .arg("--push-retry=3")
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr));

    let mut child = cmd.spawn().context("failed to spawn kubectl run")?;

    match tokio::time::timeout(build.timeout, child.wait()).await {
        Ok(status) => Ok(status
            .context("kaniko build process failed")?
            .code()
            .unwrap_or(1)),
        Err(_) => {
            warn!("kaniko build {} timed out after {:?}", pod, build.timeout);
            child.kill().await.ok();
            // Leave no half-finished pod behind for the next request
            delete_stale_pod(build.name).await.ok();
            Ok(EXIT_TIMEOUT)
        }
    }
}
