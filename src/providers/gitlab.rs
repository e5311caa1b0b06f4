use super::{sanitize, CiProvider, CliLabels, RunnerAdapter, RunnerConfig, RunnerEnvVar,
    WorkflowAdapter};

use std::collections::BTreeMap;

/// Startup script for the GitLab runner container.
///
/// Uses the newer runner-creation API (`POST /user/runners`) so the PAT only
/// ever mints a scoped runner token; the token is revoked again in the
/// SIGTERM trap.
const STARTUP_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail

RUNNER_NAME="${RUNNER_NAME:-$(hostname)}"

CREATE_RESPONSE="$(curl -sf --max-time 30 -X POST \
  -H "PRIVATE-TOKEN: ${GITLAB_PAT}" \
  --data-urlencode "runner_type=project_type" \
  --data-urlencode "project_id=${PROJECT_PATH}" \
  --data-urlencode "description=${RUNNER_NAME}" \
  --data-urlencode "tag_list=${RUNNER_LABELS}" \
  "${API_BASE_URL}/user/runners")"
RUNNER_TOKEN="$(echo "${CREATE_RESPONSE}" | jq -r .token)"
RUNNER_ID="$(echo "${CREATE_RESPONSE}" | jq -r .id)"

gitlab-runner register --non-interactive \
  --url "${PLATFORM_URL}" \
  --token "${RUNNER_TOKEN}" \
  --name "${RUNNER_NAME}" \
  --executor shell \
  --builds-dir "${RUNNER_WORKDIR}"

deregister() {
  curl -sf --max-time 30 -X DELETE \
    -H "PRIVATE-TOKEN: ${GITLAB_PAT}" \
    "${API_BASE_URL}/runners/${RUNNER_ID}" || true
}
trap 'deregister; exit 0' TERM

gitlab-runner run &
wait $!
"#;

const PROMPT_CONTEXT: &str = r#"Build and deploy jobs never call docker, kubectl or kaniko directly.
A trusted build-agent sidecar shares /builds with the runner; stage the
payload files first, then create the trigger file, then poll for the .done
marker and read the .exitcode and log files. Images push to the in-cluster
registry registry:5000.
"#;

const EXAMPLE_PIPELINE: &str = r#"stages: [build, deploy]

build:
  stage: build
  tags: [self-hosted]
  script:
    - tar -czf /builds/app.tar.gz .
    - echo "registry:5000/app:${CI_COMMIT_SHORT_SHA}" > /builds/app.dest
    - touch /builds/app.request
    - while [ ! -f /builds/app.done ]; do sleep 2; done
    - cat /builds/app.log
    - exit "$(cat /builds/app.exitcode)"

deploy:
  stage: deploy
  tags: [self-hosted]
  script:
    - sed "s/IMAGE_TAG/${CI_COMMIT_SHORT_SHA}/" k8s/staging.yaml > /builds/app.yaml
    - touch /builds/app.apply
    - while [ ! -f /builds/app.apply-done ]; do sleep 2; done
    - cat /builds/app.apply-log
    - exit "$(cat /builds/app.apply-exitcode)"
"#;

pub struct GitlabProvider {
    runner: GitlabRunner,
    workflow: GitlabWorkflow,
}

impl GitlabProvider {
    pub fn new() -> Self {
        Self {
            runner: GitlabRunner,
            workflow: GitlabWorkflow,
        }
    }
}

impl Default for GitlabProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CiProvider for GitlabProvider {
    fn name(&self) -> &str {
        "gitlab"
    }

    fn display_name(&self) -> &str {
        "GitLab"
    }

    fn cli_labels(&self) -> CliLabels {
        CliLabels {
            platform: "GitLab CI".to_string(),
            crd_plural: "cirunnerpools".to_string(),
            runner_component: "gitlab-runner".to_string(),
        }
    }

    fn runner(&self) -> &dyn RunnerAdapter {
        &self.runner
    }

    fn workflow(&self) -> &dyn WorkflowAdapter {
        &self.workflow
    }
}

struct GitlabRunner;

impl RunnerAdapter for GitlabRunner {
    fn default_image(&self) -> &str {
        "gitlab/gitlab-runner:latest"
    }

    fn default_token_key(&self) -> &str {
        "gitlab-token"
    }

    fn default_work_dir(&self) -> &str {
        "/builds-workdir"
    }

    fn api_base_url(&self, platform_url: &str) -> String {
        format!("{}/api/v4", platform_url.trim_end_matches('/'))
    }

    fn runner_env_vars(&self, config: &RunnerConfig) -> Vec<RunnerEnvVar> {
        vec![
            RunnerEnvVar::from_secret(
                "GITLAB_PAT",
                &config.token_secret_name,
                &config.token_secret_key,
            ),
            RunnerEnvVar::literal("PROJECT_PATH", config.repository.clone()),
            RunnerEnvVar::literal("PLATFORM_URL", config.platform_url.clone()),
            RunnerEnvVar::literal("API_BASE_URL", self.api_base_url(&config.platform_url)),
            RunnerEnvVar::literal("RUNNER_NAME", config.cr_name.clone()),
            RunnerEnvVar::literal("RUNNER_LABELS", config.labels.join(",")),
            RunnerEnvVar::literal("RUNNER_WORKDIR", config.work_dir.clone()),
        ]
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
            "gitlab-runner".to_string(),
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

struct GitlabWorkflow;

impl WorkflowAdapter for GitlabWorkflow {
    fn system_prompt(&self, host_arch: &str) -> String {
        format!(
            "You write GitLab CI pipelines for a self-hosted runner on a \
             local {host_arch} Kubernetes cluster. Jobs must carry the \
             self-hosted tag and perform builds and cluster operations only \
             through the /builds build-agent protocol described in the \
             context."
        )
    }

    fn prompt_context(&self) -> String {
        PROMPT_CONTEXT.to_string()
    }

    fn example_workflows(&self) -> Vec<(String, String)> {
        vec![(".gitlab-ci.yml".to_string(), EXAMPLE_PIPELINE.to_string())]
    }

    fn default_output_path(&self) -> &str {
        ".gitlab-ci.yml"
    }

    fn strip_template_expressions(&self, text: &str) -> String {
        // GitLab interpolates plain $VARIABLES at runtime; there is no
        // bracketed template syntax to strip.
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_url() {
        assert_eq!(
            GitlabRunner.api_base_url("https://gitlab.com/"),
            "https://gitlab.com/api/v4"
        );
    }

    #[test]
    fn test_startup_script_contract() {
        let script = GitlabRunner.startup_script();
        assert!(script.contains("/user/runners"));
        assert!(script.contains("gitlab-runner register"));
        assert!(script.contains("trap 'deregister; exit 0' TERM"));
    }

    #[test]
    fn test_env_vars_include_pat_ref() {
        let config = RunnerConfig {
            username: "bob".to_string(),
            repository: "bob/app".to_string(),
            platform_url: "https://gitlab.com".to_string(),
            token_secret_name: "pat".to_string(),
            token_secret_key: "gitlab-token".to_string(),
            labels: vec!["self-hosted".to_string(), "bob".to_string()],
            runner_group: None,
            work_dir: "/builds-workdir".to_string(),
            cr_name: "bob-pool".to_string(),
        };
        let vars = GitlabRunner.runner_env_vars(&config);
        let pat = vars.iter().find(|v| v.name == "GITLAB_PAT").unwrap();
        assert_eq!(
            pat.secret_ref,
            Some(("pat".to_string(), "gitlab-token".to_string()))
        );
    }
}
