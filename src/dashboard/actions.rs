use super::error::{ApiError, ApiErrorExt};
use super::expose::TunnelHandle;
use super::models::{
    ApplyRequest, CreateRunnerRequest, CreateSecretRequest, DeployRequest, EnvMutationRequest,
    LoadRequest, ScaleRequest, SyncRequest,
};
use super::models::ok_envelope;
use super::state::AppState;
use crate::dse::DevStagingEnvironment;
use crate::runner::CIRunnerPool;
use crate::sync::{spawn_session, SyncEngine, SyncOptions};

use axum::extract::{Path, State};
use axum::Json;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Pod, Secret};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

const DASHBOARD_MANAGER: &str = "kindling-dashboard";

fn apply_params() -> PatchParams {
    PatchParams::apply(DASHBOARD_MANAGER).force()
}

/// Create or update a DevStagingEnvironment
pub async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut dse = DevStagingEnvironment::new(&request.name, request.spec);
    dse.metadata.namespace = Some(request.namespace.clone());

    let api: Api<DevStagingEnvironment> =
        Api::namespaced(state.client.clone(), &request.namespace);
    api.patch(&request.name, &apply_params(), &Patch::Apply(&dse))
        .await?;
    info!("deployed DSE {}/{}", request.namespace, request.name);
    Ok(ok_envelope(Some(format!(
        "devstagingenvironment {}/{} applied",
        request.namespace, request.name
    ))))
}

/// Apply raw YAML via kubectl (multi-document supported)
pub async fn apply(
    State(_state): State<AppState>,
    Json(request): Json<ApplyRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.yaml.trim().is_empty() {
        return Err(ApiError::bad_request("yaml body is empty"));
    }
    let mut child = Command::new("kubectl")
        .args(["apply", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .internal_err("failed to spawn kubectl")?;
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(request.yaml.as_bytes())
        .await
        .internal_err("failed to write manifest to kubectl")?;
    let output = child
        .wait_with_output()
        .await
        .internal_err("kubectl apply failed to run")?;

    if output.status.success() {
        Ok(ok_envelope(Some(
            String::from_utf8_lossy(&output.stdout).to_string(),
        )))
    } else {
        Err(ApiError::bad_request(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }
}

pub async fn delete_dse(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let api: Api<DevStagingEnvironment> = Api::namespaced(state.client.clone(), &namespace);
    api.delete(&name, &DeleteParams::default()).await?;
    Ok(ok_envelope(Some(format!(
        "devstagingenvironment {}/{} deleted",
        namespace, name
    ))))
}

pub async fn create_secret(
    State(state): State<AppState>,
    Json(request): Json<CreateSecretRequest>,
) -> Result<Json<Value>, ApiError> {
    let secret = Secret {
        metadata: kube::core::ObjectMeta {
            name: Some(request.name.clone()),
            namespace: Some(request.namespace.clone()),
            ..Default::default()
        },
        string_data: Some(request.data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };
    let api: Api<Secret> = Api::namespaced(state.client.clone(), &request.namespace);
    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(ok_envelope(Some(format!(
            "secret {}/{} created",
            request.namespace, request.name
        )))),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(ApiError::conflict(format!(
            "secret {}/{} already exists",
            request.namespace, request.name
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let api: Api<Secret> = Api::namespaced(state.client.clone(), &namespace);
    api.delete(&name, &DeleteParams::default()).await?;
    Ok(ok_envelope(Some(format!(
        "secret {}/{} deleted",
        namespace, name
    ))))
}

pub async fn create_runner(
    State(state): State<AppState>,
    Json(request): Json<CreateRunnerRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut pool = CIRunnerPool::new(&request.name, request.spec);
    pool.metadata.namespace = Some(request.namespace.clone());

    let api: Api<CIRunnerPool> = Api::namespaced(state.client.clone(), &request.namespace);
    api.patch(&request.name, &apply_params(), &Patch::Apply(&pool))
        .await?;
    Ok(ok_envelope(Some(format!(
        "cirunnerpool {}/{} applied",
        request.namespace, request.name
    ))))
}

/// Annotate a deployment's pod template so the controller rolls fresh pods
async fn restart_deployment(
    client: &kube::Client,
    namespace: &str,
    name: &str,
) -> Result<(), ApiError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let patch = json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        "kindling.dev/restarted-at": chrono::Utc::now().to_rfc3339(),
                    }
                }
            }
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Roll every runner deployment so stuck runners re-register
pub async fn reset_runners(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pools: Api<CIRunnerPool> = Api::all(state.client.clone());
    let list = pools.list(&Default::default()).await?;

    let mut restarted = Vec::new();
    for pool in &list.items {
        let Some(namespace) = pool.namespace() else {
            continue;
        };
        let provider = crate::providers::get(&pool.spec.ci_provider)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let name = provider.runner().deployment_name(&pool.spec.github_username);
        restart_deployment(&state.client, &namespace, &name).await?;
        restarted.push(format!("{}/{}", namespace, name));
    }
    Ok(ok_envelope(Some(format!(
        "restarted {} runner deployment(s): {}",
        restarted.len(),
        restarted.join(", ")
    ))))
}

async fn mutate_env(
    state: &AppState,
    request: &EnvMutationRequest,
    unset: bool,
) -> Result<(), ApiError> {
    let api: Api<Deployment> = Api::namespaced(state.client.clone(), &request.namespace);
    let mut deployment = api
        .get_opt(&request.deployment)
        .await?
        .ok_or_else(|| ApiError::not_found("deployment not found"))?;

    let pod_spec = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .ok_or_else(|| ApiError::bad_request("deployment has no pod template"))?;
    let container = match &request.container {
        Some(name) => pod_spec
            .containers
            .iter_mut()
            .find(|c| &c.name == name)
            .ok_or_else(|| ApiError::not_found("container not found"))?,
        None => pod_spec
            .containers
            .first_mut()
            .ok_or_else(|| ApiError::bad_request("deployment has no containers"))?,
    };

    let mut env = container.env.take().unwrap_or_default();
    env.retain(|var| var.name != request.name);
    if !unset {
        env.push(EnvVar {
            name: request.name.clone(),
            value: Some(request.value.clone()),
            ..Default::default()
        });
    }
    container.env = (!env.is_empty()).then_some(env);

    api.replace(&request.deployment, &PostParams::default(), &deployment)
        .await?;
    Ok(())
}

pub async fn env_set(
    State(state): State<AppState>,
    Json(request): Json<EnvMutationRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("env var name is required"));
    }
    mutate_env(&state, &request, false).await?;
    Ok(ok_envelope(Some(format!(
        "set {} on {}/{}",
        request.name, request.namespace, request.deployment
    ))))
}

pub async fn env_unset(
    State(state): State<AppState>,
    Json(request): Json<EnvMutationRequest>,
) -> Result<Json<Value>, ApiError> {
    mutate_env(&state, &request, true).await?;
    Ok(ok_envelope(Some(format!(
        "unset {} on {}/{}",
        request.name, request.namespace, request.deployment
    ))))
}

#[derive(Debug, serde::Deserialize)]
pub struct ExposeRequest {
    #[serde(default = "default_expose_port")]
    pub port: u16,
}

fn default_expose_port() -> u16 {
    80
}

pub async fn expose_start(
    State(state): State<AppState>,
    Json(request): Json<ExposeRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut tunnel = state.tunnel.lock().await;
    if tunnel.is_some() {
        return Err(ApiError::conflict("a tunnel is already running"));
    }
    let handle = TunnelHandle::start(
        &state.repo_root,
        &state.settings.expose.tunnel_command,
        request.port,
    )
    .await
    .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let output = format!("tunnel started on port {}", handle.descriptor.port);
    *tunnel = Some(handle);
    Ok(ok_envelope(Some(output)))
}

pub async fn expose_stop(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let handle = state
        .tunnel
        .lock()
        .await
        .take()
        .ok_or_else(|| ApiError::not_found("no tunnel is running"))?;
    handle.stop().await;
    Ok(ok_envelope(Some("tunnel stopped".to_string())))
}

pub async fn restart(
    State(state): State<AppState>,
    Path((namespace, deployment)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    restart_deployment(&state.client, &namespace, &deployment).await?;
    Ok(ok_envelope(Some(format!(
        "deployment {}/{} restarted",
        namespace, deployment
    ))))
}

pub async fn scale(
    State(state): State<AppState>,
    Path((namespace, deployment)): Path<(String, String)>,
    Json(request): Json<ScaleRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.replicas < 0 {
        return Err(ApiError::bad_request("replicas must be non-negative"));
    }
    let api: Api<Deployment> = Api::namespaced(state.client.clone(), &namespace);
    api.patch_scale(
        &deployment,
        &PatchParams::default(),
        &Patch::Merge(json!({ "spec": { "replicas": request.replicas } })),
    )
    .await?;
    Ok(ok_envelope(Some(format!(
        "deployment {}/{} scaled to {}",
        namespace, deployment, request.replicas
    ))))
}

pub async fn delete_pod(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let api: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    api.delete(&name, &DeleteParams::default()).await?;
    Ok(ok_envelope(Some(format!("pod {}/{} deleted", namespace, name))))
}

/// Start a sync session: prepare the plan, do the initial full copy, then
/// watch for changes. At most one session may be active.
pub async fn sync_start(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut sync = state.sync.lock().await;
    if sync.is_some() {
        return Err(ApiError::conflict("a sync session is already active"));
    }

    let options = SyncOptions {
        deployment: request.deployment.clone(),
        namespace: request.namespace.clone(),
        src: request.src.clone().into(),
        dest: request
            .dest
            .clone()
            .unwrap_or_else(|| SyncOptions::default_dest().to_string()),
        container: request.container.clone(),
        restart: request.restart,
    };
    if !options.src.is_dir() {
        return Err(ApiError::bad_request(format!(
            "source directory {} does not exist",
            options.src.display()
        )));
    }

    let engine = SyncEngine::new(options, state.settings.sync.clone());
    let mut plan = engine.prepare().await.internal_err("sync prepare failed")?;
    engine
        .flush(&mut plan, None)
        .await
        .internal_err("initial sync failed")?;

    let runtime = plan.detected.runtime.clone();
    let mode = crate::sync::mode_str(plan.detected.mode());
    let handle = spawn_session(
        engine,
        plan,
        Duration::from_millis(state.settings.sync.debounce_ms),
    );
    *sync = Some(handle);

    Ok(ok_envelope(Some(format!(
        "sync started for {}/{} (runtime: {}, mode: {})",
        request.namespace, request.deployment, runtime, mode
    ))))
}

/// Stop the active session: one final flush, then teardown (rollout undo or
/// restart).
pub async fn sync_stop(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let handle = state
        .sync
        .lock()
        .await
        .take()
        .ok_or_else(|| ApiError::not_found("no sync session is active"))?;
    handle.stop().await;
    Ok(ok_envelope(Some("sync session stopped".to_string())))
}

/// Build an image locally, load it into the cluster, and optionally repoint
/// a deployment at it.
pub async fn load(
    State(state): State<AppState>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut output = String::new();

    let build = Command::new("docker")
        .args(["build", "-t", &request.image, &request.path])
        .output()
        .await
        .internal_err("failed to spawn docker build")?;
    output.push_str(&String::from_utf8_lossy(&build.stderr));
    if !build.status.success() {
        return Err(ApiError::bad_request(format!(
            "docker build failed:\n{}",
            String::from_utf8_lossy(&build.stderr)
        )));
    }

    // Prefer a direct image import into the local cluster; fall back to a
    // registry push for setups without k3d.
    let import = Command::new("k3d")
        .args([
            "image",
            "import",
            &request.image,
            "-c",
            &state.settings.cluster.name,
        ])
        .output()
        .await;
    let imported = matches!(&import, Ok(out) if out.status.success());
    if imported {
        output.push_str("image imported into cluster\n");
    } else {
        let push = Command::new("docker")
            .args(["push", &request.image])
            .output()
            .await
            .internal_err("failed to spawn docker push")?;
        if !push.status.success() {
            return Err(ApiError::bad_request(format!(
                "image load failed (no k3d import, push failed):\n{}",
                String::from_utf8_lossy(&push.stderr)
            )));
        }
        output.push_str("image pushed to registry\n");
    }

    if let Some(deployment_name) = &request.deployment {
        let api: Api<Deployment> = Api::namespaced(state.client.clone(), &request.namespace);
        let mut deployment = api
            .get_opt(deployment_name)
            .await?
            .ok_or_else(|| ApiError::not_found("deployment not found"))?;
        let pod_spec = deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .ok_or_else(|| ApiError::bad_request("deployment has no pod template"))?;
        let container = match &request.container {
            Some(name) => pod_spec
                .containers
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| ApiError::not_found("container not found"))?,
            None => pod_spec
                .containers
                .first_mut()
                .ok_or_else(|| ApiError::bad_request("deployment has no containers"))?,
        };
        container.image = Some(request.image.clone());
        api.replace(deployment_name, &PostParams::default(), &deployment)
            .await?;
        output.push_str(&format!(
            "deployment {}/{} repointed at {}\n",
            request.namespace, deployment_name, request.image
        ));
    }

    Ok(ok_envelope(Some(output)))
}
