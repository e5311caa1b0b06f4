use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A developer's personal running environment for one application:
/// a Deployment plus backing dependencies, Services and optional Ingress.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.example.com",
    version = "v1alpha1",
    kind = "DevStagingEnvironment",
    namespaced,
    status = "DevStagingEnvironmentStatus",
    shortname = "dse",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.deployment.image"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.deployment.port"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.ingress.host"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DevStagingEnvironmentSpec {
    pub deployment: AppDeployment,
    pub service: AppService,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<AppIngress>,
    /// Ordered list of backing dependencies; order determines env var order
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppDeployment {
    pub image: String,
    pub port: i32,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub env: Vec<AppEnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<AppResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppEnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Partial resource maps are allowed; keys are standard resource names
/// ("cpu", "memory"), values Kubernetes quantities.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppResources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Probe configuration. `type` is one of `""`/`"http"` (HTTP probe),
/// `"grpc"`, or `"none"` to disable probes entirely.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: String,
    /// Defaults to the container port when zero
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub initial_delay_seconds: i32,
    #[serde(default)]
    pub period_seconds: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppService {
    pub port: i32,
    /// Defaults to the deployment port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
    /// ClusterIP (default), NodePort or LoadBalancer
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppIngress {
    pub host: String,
    #[serde(default = "default_ingress_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
}

fn default_ingress_path() -> String {
    "/".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Registry kind, e.g. "postgres", "redis", "kafka"
    #[serde(rename = "type")]
    pub kind: String,
    /// Image tag override for the registry default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Overrides the env var name injected into the app container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_name: Option<String>,
    /// Explicit credentials; omitted means materialise-or-adopt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<DependencyCredentials>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCredentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevStagingEnvironmentStatus {
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
    /// Spec hash of the last fully reconciled generation
    #[serde(default)]
    pub observed_spec_hash: String,
}

/// Status condition with a stable CamelCase reason and a human message
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub kind: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl StatusCondition {
    pub fn new(kind: &str, ok: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            status: if ok { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_spec_deserializes_with_defaults() {
        let spec: DevStagingEnvironmentSpec = serde_json::from_value(serde_json::json!({
            "deployment": {"image": "nginx:1", "port": 80},
            "service": {"port": 80},
            "dependencies": [{"type": "postgres"}]
        }))
        .unwrap();

        assert_eq!(spec.deployment.replicas, 1);
        assert!(spec.deployment.env.is_empty());
        assert!(spec.ingress.is_none());
        assert_eq!(spec.dependencies[0].kind, "postgres");
        assert!(spec.dependencies[0].credentials.is_none());
    }

    #[test]
    fn test_condition_status_strings() {
        let ok = StatusCondition::new("Ready", true, "AllReady", "all good");
        assert!(ok.is_true());
        assert_eq!(ok.status, "True");
        let bad = StatusCondition::new("Ready", false, "DependencyInvalid", "nope");
        assert_eq!(bad.status, "False");
    }
}
