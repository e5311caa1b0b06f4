use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Mutation response envelope: `{ok, output?, error?}`
pub fn ok_envelope(output: Option<String>) -> Json<serde_json::Value> {
    match output {
        Some(output) => Json(json!({ "ok": true, "output": output })),
        None => Json(json!({ "ok": true })),
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub yaml: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub spec: crate::dse::DevStagingEnvironmentSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSecretRequest {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub data: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunnerRequest {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub spec: crate::runner::CIRunnerPoolSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvMutationRequest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub deployment: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub container: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub replicas: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub deployment: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub src: String,
    #[serde(default)]
    pub dest: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    /// Local build context
    pub path: String,
    /// Image reference to build and load
    pub image: String,
    /// Deployment to repoint at the freshly loaded image
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub container: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default = "default_tail")]
    pub tail: i64,
}

#[derive(Debug, Deserialize)]
pub struct RuntimeQuery {
    #[serde(default)]
    pub src: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_tail() -> i64 {
    100
}

/// Shape of the `/api/runtime/{ns}/{deployment}` response
#[derive(Debug, Serialize)]
pub struct RuntimeReport {
    pub runtime: String,
    pub mode: &'static str,
    pub strategy: &'static str,
    pub sync_supported: bool,
    pub language: String,
    pub is_frontend: bool,
    pub container: String,
    pub default_dest: &'static str,
}
