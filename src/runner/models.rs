use crate::dse::models::StatusCondition;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A developer's self-hosted CI runner registration: one runner Deployment
/// (runner + build-agent sidecar) plus the RBAC the sidecar needs.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.example.com",
    version = "v1alpha1",
    kind = "CIRunnerPool",
    namespaced,
    status = "CIRunnerPoolStatus",
    printcolumn = r#"{"name":"Username","type":"string","jsonPath":".spec.githubUsername"}"#,
    printcolumn = r#"{"name":"Repository","type":"string","jsonPath":".spec.repository"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyRunners"}"#,
    printcolumn = r#"{"name":"Active Job","type":"string","jsonPath":".status.activeJob"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CIRunnerPoolSpec {
    /// Developer identity; sanitised to DNS-safe form for resource names
    pub github_username: String,
    /// `owner/repo` slug
    pub repository: String,
    #[serde(default = "default_platform_url")]
    pub platform_url: String,
    /// Secret holding the long-lived PAT used only to mint ephemeral
    /// registration tokens
    pub token_secret_ref: TokenSecretRef,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Overrides the provider's default runner image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_image: Option<String>,
    /// Extra runner labels; `self-hosted` and the sanitised username are
    /// always prepended
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<RunnerResources>,
    #[serde(default)]
    pub env: Vec<RunnerEnv>,
    /// Extra pod volumes, passed through verbatim
    #[serde(default)]
    pub volumes: Vec<serde_json::Value>,
    /// Extra runner container volume mounts, passed through verbatim
    #[serde(default)]
    pub volume_mounts: Vec<serde_json::Value>,
    /// Overrides the operator-managed ServiceAccount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// CI platform adapter; defaults to `github`
    #[serde(default)]
    pub ci_provider: String,
}

fn default_platform_url() -> String {
    "https://github.com".to_string()
}

fn default_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenSecretRef {
    pub name: String,
    /// Defaults to the provider's token key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerResources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerEnv {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CIRunnerPoolStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_runners: i32,
    /// True when availableReplicas == replicas > 0
    #[serde(default)]
    pub runner_registered: bool,
    /// Name of the job a runner is currently executing, when reported
    #[serde(default)]
    pub active_job: String,
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: CIRunnerPoolSpec = serde_json::from_value(serde_json::json!({
            "githubUsername": "Alice.Dev",
            "repository": "alice/demo",
            "tokenSecretRef": {"name": "pat", "key": "github-token"}
        }))
        .unwrap();

        assert_eq!(spec.platform_url, "https://github.com");
        assert_eq!(spec.replicas, 1);
        assert!(spec.ci_provider.is_empty());
        assert_eq!(spec.token_secret_ref.key.as_deref(), Some("github-token"));
    }
}
