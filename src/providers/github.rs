use super::{sanitize, CiProvider, CliLabels, RunnerAdapter, RunnerConfig, RunnerEnvVar,
    WorkflowAdapter};

use std::collections::BTreeMap;

/// Startup script for the GitHub Actions runner container.
///
/// The PAT never registers the runner directly: it only mints short-lived
/// registration/removal tokens. The SIGTERM trap de-registers with a fresh
/// removal token so deleted pools don't leave offline runners behind in the
/// repository settings.
const STARTUP_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail

RUNNER_NAME="${RUNNER_NAME:-$(hostname)}"

fetch_token() {
  curl -sf --max-time 30 -X POST \
    -H "Authorization: token ${GITHUB_PAT}" \
    -H "Accept: application/vnd.github+json" \
    "${API_BASE_URL}/repos/${REPOSITORY}/actions/runners/$1" | jq -r .token
}

REG_TOKEN="$(fetch_token registration-token)"

cd /home/runner

./config.sh --unattended \
  --url "${PLATFORM_URL}/${REPOSITORY}" \
  --token "${REG_TOKEN}" \
  --name "${RUNNER_NAME}" \
  --labels "${RUNNER_LABELS}" \
  --work "${RUNNER_WORKDIR}" \
  ${RUNNER_GROUP:+--runnergroup "${RUNNER_GROUP}"} \
  --replace

deregister() {
  REMOVE_TOKEN="$(fetch_token remove-token)" || true
  if [ -n "${REMOVE_TOKEN:-}" ]; then
    ./config.sh remove --token "${REMOVE_TOKEN}" || true
  fi
}
trap 'deregister; exit 0' TERM

./run.sh &
wait $!
"#;

const PROMPT_CONTEXT: &str = r#"Build and deploy steps never call docker, kubectl or kaniko directly.
A trusted build-agent sidecar shares /builds with the runner:

- image build: write <name>.tar.gz (build context), <name>.dest (target
  image reference), optionally <name>.dockerfile, then create the empty
  trigger file <name>.request. Poll for <name>.done, then read
  <name>.exitcode and <name>.log.
- manifest apply: write <name>.yaml then create <name>.apply; results in
  <name>.apply-exitcode / <name>.apply-log after <name>.apply-done.
- cluster commands: write <name>.sh then create <name>.kubectl; results in
  <name>.kubectl-exitcode / <name>.kubectl-log after <name>.kubectl-done.

Images push to the in-cluster registry registry:5000.
"#;

const EXAMPLE_BUILD_WORKFLOW: &str = r#"name: build-and-deploy
on:
  push:
    branches: [main]
jobs:
  build:
    runs-on: [self-hosted]
    steps:
      - uses: actions/checkout@v4
      - name: Build image via build-agent
        run: |
          tar -czf /builds/app.tar.gz .
          echo "registry:5000/app:${GITHUB_SHA::7}" > /builds/app.dest
          touch /builds/app.request
          while [ ! -f /builds/app.done ]; do sleep 2; done
          cat /builds/app.log
          exit "$(cat /builds/app.exitcode)"
      - name: Deploy
        run: |
          sed "s/IMAGE_TAG/${GITHUB_SHA::7}/" k8s/staging.yaml > /builds/app.yaml
          touch /builds/app.apply
          while [ ! -f /builds/app.apply-done ]; do sleep 2; done
          cat /builds/app.apply-log
          exit "$(cat /builds/app.apply-exitcode)"
"#;

pub struct GithubProvider {
    runner: GithubRunner,
    workflow: GithubWorkflow,
}

impl GithubProvider {
    pub fn new() -> Self {
        Self {
            runner: GithubRunner,
            workflow: GithubWorkflow,
        }
    }
}

impl Default for GithubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CiProvider for GithubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn display_name(&self) -> &str {
        "GitHub"
    }

    fn cli_labels(&self) -> CliLabels {
        CliLabels {
            platform: "GitHub Actions".to_string(),
            crd_plural: "cirunnerpools".to_string(),
            runner_component: "github-runner".to_string(),
        }
    }

    fn runner(&self) -> &dyn RunnerAdapter {
        &self.runner
    }

    fn workflow(&self) -> &dyn WorkflowAdapter {
        &self.workflow
    }
}

struct GithubRunner;

impl RunnerAdapter for GithubRunner {
    fn default_image(&self) -> &str {
        "ghcr.io/actions/actions-runner:latest"
    }

    fn default_token_key(&self) -> &str {
        "github-token"
    }

    fn default_work_dir(&self) -> &str {
        "/home/runner/_work"
    }

    fn api_base_url(&self, platform_url: &str) -> String {
        let trimmed = platform_url.trim_end_matches('/');
        if trimmed == "https://github.com" {
            "https://api.github.com".to_string()
        } else {
            // GitHub Enterprise Server
            format!("{}/api/v3", trimmed)
        }
    }

    fn runner_env_vars(&self, config: &RunnerConfig) -> Vec<RunnerEnvVar> {
        let mut vars = vec![
            RunnerEnvVar::from_secret(
                "GITHUB_PAT",
                &config.token_secret_name,
                &config.token_secret_key,
            ),
            RunnerEnvVar::literal("REPOSITORY", config.repository.clone()),
            RunnerEnvVar::literal("PLATFORM_URL", config.platform_url.clone()),
            RunnerEnvVar::literal("API_BASE_URL", self.api_base_url(&config.platform_url)),
            RunnerEnvVar::literal("RUNNER_NAME", config.cr_name.clone()),
            RunnerEnvVar::literal("RUNNER_LABELS", config.labels.join(",")),
            RunnerEnvVar::literal("RUNNER_WORKDIR", config.work_dir.clone()),
        ];
        if let Some(group) = &config.runner_group {
            vars.push(RunnerEnvVar::literal("RUNNER_GROUP", group.clone()));
        }
        vars
    }

    fn runner_labels(&self, username: &str, cr_name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/name".to_string(),
            format!("{}-runner", sanitize(username)),
        );
        labels.insert("app.kubernetes.io/instance".to_string(), cr_name.to_string());
        labels.insert(
            "app.kubernetes.io/component".to_string(),
            "github-runner".to_string(),
        );
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "cirunnerpool-operator".to_string(),
        );
        labels
    }

    fn startup_script(&self) -> &str {
        STARTUP_SCRIPT
    }
}

struct GithubWorkflow;

impl WorkflowAdapter for GithubWorkflow {
    fn system_prompt(&self, host_arch: &str) -> String {
        format!(
            "You write GitHub Actions workflows for a self-hosted runner on a \
             local {host_arch} Kubernetes cluster. Jobs must run on \
             [self-hosted] and perform builds and cluster operations only \
             through the /builds build-agent protocol described in the \
             context. Keep workflows minimal: one build job, one deploy step."
        )
    }

    fn prompt_context(&self) -> String {
        PROMPT_CONTEXT.to_string()
    }

    fn example_workflows(&self) -> Vec<(String, String)> {
        vec![(
            "build-and-deploy.yml".to_string(),
            EXAMPLE_BUILD_WORKFLOW.to_string(),
        )]
    }

    fn default_output_path(&self) -> &str {
        ".github/workflows/kindling.yml"
    }

    fn strip_template_expressions(&self, text: &str) -> String {
        // Drop ${{ ... }} expressions so example text can't smuggle
        // unevaluated context references into generated workflows.
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${{") {
            out.push_str(&rest[..start]);
            match rest[start..].find("}}") {
                Some(end) => rest = &rest[start + end + 2..],
                None => {
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RunnerConfig {
        RunnerConfig {
            username: "Alice.Dev".to_string(),
            repository: "alice/demo".to_string(),
            platform_url: "https://github.com".to_string(),
            token_secret_name: "pat".to_string(),
            token_secret_key: "github-token".to_string(),
            labels: vec!["self-hosted".to_string(), "alice-dev".to_string()],
            runner_group: None,
            work_dir: "/home/runner/_work".to_string(),
            cr_name: "alice-pool".to_string(),
        }
    }

    #[test]
    fn test_api_base_url() {
        let runner = GithubRunner;
        assert_eq!(
            runner.api_base_url("https://github.com"),
            "https://api.github.com"
        );
        assert_eq!(
            runner.api_base_url("https://ghe.corp.example/"),
            "https://ghe.corp.example/api/v3"
        );
    }

    #[test]
    fn test_runner_env_vars() {
        let runner = GithubRunner;
        let vars = runner.runner_env_vars(&test_config());

        let pat = vars.iter().find(|v| v.name == "GITHUB_PAT").unwrap();
        assert_eq!(
            pat.secret_ref,
            Some(("pat".to_string(), "github-token".to_string()))
        );

        let labels = vars.iter().find(|v| v.name == "RUNNER_LABELS").unwrap();
        let value = labels.value.as_deref().unwrap();
        assert!(value.contains("self-hosted"));
        assert!(value.contains("alice-dev"));
    }

    #[test]
    fn test_startup_script_contract() {
        let script = GithubRunner.startup_script();
        assert!(script.contains("registration-token"));
        assert!(script.contains("remove-token"));
        assert!(script.contains("trap 'deregister; exit 0' TERM"));
        assert!(script.contains("./run.sh"));
    }

    #[test]
    fn test_strip_template_expressions() {
        let workflow = GithubWorkflow;
        let stripped =
            workflow.strip_template_expressions("image: app:${{ github.sha }} # tag");
        assert_eq!(stripped, "image: app: # tag");
        // Unterminated expressions are dropped to end of input
        assert_eq!(workflow.strip_template_expressions("a ${{ b"), "a ");
    }
}
