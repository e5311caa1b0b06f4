use super::protocol::{Request, RequestKind};

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Result of one sidecar action, as observed by the runner side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub exit_code: i32,
    pub log: String,
}

impl ActionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runner-side mirror of the sidecar protocol: stage payloads, write the
/// trigger last, poll for `.done`, read exit code and log, clean up.
///
/// The runner never calls kubectl or Kaniko directly; this client is its only
/// path to privileged operations.
pub struct BuildAgentClient {
    dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
}

impl BuildAgentClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Submit an image build: context tarball + destination reference, then
    /// the zero-byte `.request` trigger.
    pub async fn submit_build(
        &self,
        name: &str,
        context_tar: &Path,
        dest: &str,
        dockerfile: Option<&str>,
    ) -> Result<ActionResult> {
        let request = Request::new(&self.dir, RequestKind::Build, name);
        fs::copy(context_tar, request.context_path())
            .with_context(|| format!("failed to stage {}", context_tar.display()))?;
        fs::write(request.dest_path(), dest)?;
        if let Some(dockerfile) = dockerfile {
            fs::write(request.dockerfile_path(), dockerfile)?;
        }
        fs::write(request.timeout_path(), self.timeout.as_secs().to_string())?;
        File::create(request.trigger_path())?;
        self.await_done(&request).await
    }

    /// Submit a manifest for `kubectl apply`
    pub async fn submit_apply(&self, name: &str, manifest_yaml: &str) -> Result<ActionResult> {
        let request = Request::new(&self.dir, RequestKind::Apply, name);
        fs::write(request.manifest_path(), manifest_yaml)?;
        File::create(request.trigger_path())?;
        self.await_done(&request).await
    }

    /// Submit a shell snippet executed with the sidecar's cluster credentials
    pub async fn submit_script(&self, name: &str, script: &str) -> Result<ActionResult> {
        let request = Request::new(&self.dir, RequestKind::Kubectl, name);
        fs::write(request.script_path(), script)?;
        File::create(request.trigger_path())?;
        self.await_done(&request).await
    }

    async fn await_done(&self, request: &Request) -> Result<ActionResult> {
        let deadline = tokio::time::Instant::now() + self.timeout + self.poll_interval * 4;
        while !request.done_path().exists() {
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "timed out waiting for build-agent to complete '{}'",
                    request.name
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let exit_code = fs::read_to_string(request.exitcode_path())
            .context("done marker present but exit code unreadable")?
            .trim()
            .parse::<i32>()
            .context("malformed exit code")?;
        let log = fs::read_to_string(request.log_path()).unwrap_or_default();
        debug!("request '{}' completed with code {}", request.name, exit_code);

        self.cleanup(request);
        Ok(ActionResult { exit_code, log })
    }

    /// Best-effort removal of every file of the request
    fn cleanup(&self, request: &Request) {
        for path in [
            request.context_path(),
            request.dest_path(),
            request.dockerfile_path(),
            request.timeout_path(),
            request.manifest_path(),
            request.script_path(),
            request.log_path(),
            request.exitcode_path(),
            request.done_path(),
        ] {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildagent::agent::BuildAgent;
    use crate::settings::Settings;

    fn test_settings() -> Settings {
        Settings {
            cluster: Default::default(),
            dashboard: Default::default(),
            operator: Default::default(),
            build: Default::default(),
            sync: Default::default(),
            expose: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_script_round_trip_through_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let client = BuildAgentClient::new(tmp.path())
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(20));
        let agent = BuildAgent::new(tmp.path().to_path_buf(), test_settings());

        let submit = client.submit_script("roundtrip", "echo did-the-thing\n");
        let sweep = async {
            // Give the client a moment to stage and trigger, then sweep
            tokio::time::sleep(Duration::from_millis(100)).await;
            agent.sweep().await.unwrap();
        };
        let (result, _) = tokio::join!(submit, sweep);
        let result = result.unwrap();

        assert!(result.success());
        assert!(result.log.contains("did-the-thing"));
        // Cleanup removed the protocol files
        assert!(!tmp.path().join("roundtrip.sh").exists());
        assert!(!tmp.path().join("roundtrip.kubectl-done").exists());
    }

    #[tokio::test]
    async fn test_build_round_trip_stages_payloads_before_trigger() {
        let tmp = tempfile::tempdir().unwrap();
        let context_tar = tmp.path().join("src.tar.gz");
        fs::write(&context_tar, b"fake-context").unwrap();

        let client = BuildAgentClient::new(tmp.path())
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(20));
        let agent = BuildAgent::new(tmp.path().to_path_buf(), test_settings());

        let submit = client.submit_build("img", &context_tar, "registry:5000/img:dev", None);
        let sweep = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            // The scratch directory holds context + dest before the trigger,
            // so the sweep claims a complete request. The build itself fails
            // in this environment (no cluster), which still exercises the
            // full result path.
            agent.sweep().await.unwrap();
        };
        let (result, _) = tokio::join!(submit, sweep);
        let result = result.unwrap();

        assert!(!result.success());
        assert!(!result.log.is_empty());
        assert!(!tmp.path().join("img.dest").exists());
        assert!(!tmp.path().join("img.done").exists());
    }

    #[tokio::test]
    async fn test_await_done_times_out_without_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let client = BuildAgentClient::new(tmp.path())
            .with_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10));
        let err = client
            .submit_apply("orphan", "kind: ConfigMap\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
