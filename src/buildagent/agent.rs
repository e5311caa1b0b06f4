use super::kaniko::{self, KanikoBuild};
use super::protocol::{discover, Request, RequestKind};
use crate::settings::Settings;

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// The build-agent sidecar: a single-threaded sweep loop over the shared
/// `/builds` directory.
///
/// This is a deliberate trust boundary: the runner container executes
/// arbitrary workflow code with no cluster credentials, and everything
/// privileged funnels through these three file channels. The `.kubectl`
/// channel in particular grants the runner whatever the pod ServiceAccount
/// can do.
pub struct BuildAgent {
    dir: PathBuf,
    settings: Settings,
}

impl BuildAgent {
    pub fn new(dir: PathBuf, settings: Settings) -> Self {
        Self { dir, settings }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> Result<()> {
        info!("build-agent watching {}", self.dir.display());
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create {}", self.dir.display()))?;
        let interval = Duration::from_secs(self.settings.build.sweep_interval_secs.max(1));
        loop {
            if let Err(e) = self.sweep().await {
                error!("sweep failed: {:#}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One pass over the directory, servicing each request kind in the fixed
    /// protocol order.
    pub async fn sweep(&self) -> Result<()> {
        for kind in RequestKind::SWEEP_ORDER {
            for request in discover(&self.dir, kind)? {
                // The rename is the claim; losing it means another sweep
                // (e.g. after a restart) already owns the request.
                if request.claim().is_err() {
                    continue;
                }
                debug!("processing {:?} request '{}'", request.kind, request.name);
                let exit_code = self.execute(&request).await;
                if let Err(e) = self.finish(&request, exit_code) {
                    error!(
                        "failed to record result for '{}': {:#}",
                        request.name, e
                    );
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &Request) -> i32 {
        let result = match request.kind {
            RequestKind::Build => self.execute_build(request).await,
            RequestKind::Apply => self.execute_command(
                request,
                Command::new("kubectl")
                    .arg("apply")
                    .arg("-f")
                    .arg(request.manifest_path()),
            )
            .await,
            RequestKind::Kubectl => self
                .execute_command(request, Command::new("bash").arg(request.script_path()))
                .await,
        };
        match result {
            Ok(code) => code,
            Err(e) => {
                // Surface infrastructure failures in the log the runner reads
                let _ = append_log(request, &format!("build-agent error: {:#}\n", e));
                1
            }
        }
    }

    async fn execute_build(&self, request: &Request) -> Result<i32> {
        let dest_path = request.dest_path();
        let dest = match fs::read_to_string(&dest_path) {
            Ok(dest) => dest.trim().to_string(),
            Err(_) => {
                append_log(
                    request,
                    &format!("missing destination file {}\n", dest_path.display()),
                )?;
                return Ok(1);
            }
        };
        if dest.is_empty() {
            append_log(request, "destination image reference is empty\n")?;
            return Ok(1);
        }
        let context_tar = request.context_path();
        if !context_tar.exists() {
            append_log(
                request,
                &format!("missing build context {}\n", context_tar.display()),
            )?;
            return Ok(1);
        }
        let dockerfile = fs::read_to_string(request.dockerfile_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        // Per-request timeout override, in seconds
        let timeout_secs = fs::read_to_string(request.timeout_path())
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(self.settings.build.timeout_secs);

        kaniko::delete_stale_pod(&request.name).await?;

        let log = File::create(request.log_path())?;
        let build = KanikoBuild {
            name: &request.name,
            dest: &dest,
            dockerfile,
            context_tar: &context_tar,
            cache_repo: &self.settings.cluster.cache_repo,
            timeout: Duration::from_secs(timeout_secs),
        };
        kaniko::run_build(&build, log).await
    }

    async fn execute_command(&self, request: &Request, command: &mut Command) -> Result<i32> {
        let log = File::create(request.log_path())?;
        let stderr = log.try_clone()?;
        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .context("failed to spawn command")?;
        Ok(status.code().unwrap_or(1))
    }

    /// Persist the result: exit code first (synced to disk), then the `.done`
    /// marker the runner polls for, then release the claim. The runner must
    /// never observe `.done` without a durable exit code next to it.
    fn finish(&self, request: &Request, exit_code: i32) -> Result<()> {
        let mut exitcode_file = File::create(request.exitcode_path())?;
        write!(exitcode_file, "{}", exit_code)?;
        exitcode_file.sync_all()?;

        File::create(request.done_path())?.sync_all()?;

        if let Err(e) = request.release() {
            warn!("failed to remove processing marker: {}", e);
        }
        if exit_code != 0 {
            warn!(
                "{:?} request '{}' finished with exit code {}",
                request.kind, request.name, exit_code
            );
        } else {
            info!("{:?} request '{}' finished", request.kind, request.name);
        }
        Ok(())
    }
}

fn append_log(request: &Request, message: &str) -> Result<()> {
    let mut log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(request.log_path())?;
    log.write_all(message.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent(dir: &std::path::Path) -> BuildAgent {
        let settings = Settings {
            cluster: Default::default(),
            dashboard: Default::default(),
            operator: Default::default(),
            build: Default::default(),
            sync: Default::default(),
            expose: Default::default(),
        };
        BuildAgent::new(dir.to_path_buf(), settings)
    }

    #[tokio::test]
    async fn test_sweep_executes_script_request() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("job.sh"), "echo hello-from-script\nexit 3\n").unwrap();
        File::create(tmp.path().join("job.kubectl")).unwrap();

        test_agent(tmp.path()).sweep().await.unwrap();

        let request = Request::new(tmp.path(), RequestKind::Kubectl, "job");
        assert!(request.done_path().exists());
        assert!(!request.trigger_path().exists());
        assert!(!request.processing_path().exists());
        assert_eq!(fs::read_to_string(request.exitcode_path()).unwrap(), "3");
        let log = fs::read_to_string(request.log_path()).unwrap();
        assert!(log.contains("hello-from-script"));
    }

    #[tokio::test]
    async fn test_build_without_dest_fails_in_log() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("img.tar.gz"), b"not-really-a-tar").unwrap();
        File::create(tmp.path().join("img.request")).unwrap();

        test_agent(tmp.path()).sweep().await.unwrap();

        let request = Request::new(tmp.path(), RequestKind::Build, "img");
        assert!(request.done_path().exists());
        assert_eq!(fs::read_to_string(request.exitcode_path()).unwrap(), "1");
        let log = fs::read_to_string(request.log_path()).unwrap();
        assert!(log.contains("missing destination file"));
    }

    #[tokio::test]
    async fn test_done_never_precedes_exitcode() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("ok.sh"), "true\n").unwrap();
        File::create(tmp.path().join("ok.kubectl")).unwrap();

        test_agent(tmp.path()).sweep().await.unwrap();

        let request = Request::new(tmp.path(), RequestKind::Kubectl, "ok");
        // The done marker exists, so the exit code must be readable
        assert!(request.done_path().exists());
        assert_eq!(fs::read_to_string(request.exitcode_path()).unwrap(), "0");
    }
}
