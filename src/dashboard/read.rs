use super::context;
use super::error::{ApiError, ApiErrorExt};
use super::models::{LogsQuery, RuntimeQuery, RuntimeReport};
use super::state::AppState;
use super::workspace;
use crate::dse::DevStagingEnvironment;
use crate::runner::CIRunnerPool;
use crate::sync::{self, SyncEngine, SyncOptions};

use axum::extract::{Path, Query, State};
use axum::Json;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, LogParams};
use kube::ResourceExt;
use serde_json::{json, Value};

/// Namespace and name the operator Deployment is installed under
const OPERATOR_NAMESPACE: &str = "kindling-system";
const OPERATOR_DEPLOYMENT: &str = "kindling-operator";

fn deployment_ready(deployment: &Deployment) -> bool {
    let want = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    want > 0 && available == want
}

pub async fn cluster(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let version = state
        .client
        .apiserver_version()
        .await
        .internal_err("cluster is unreachable")?;
    Ok(Json(json!({
        "name": state.settings.cluster.name,
        "kubernetes_version": version.git_version,
        "platform": version.platform,
        "registry": state.settings.cluster.registry,
        "ingress_controller": state.settings.cluster.ingress_controller,
    })))
}

pub async fn nodes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let nodes: Api<Node> = Api::all(state.client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|node| {
            let info = node.status.as_ref().and_then(|s| s.node_info.as_ref());
            let ready = node
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .and_then(|conditions| {
                    conditions
                        .iter()
                        .find(|c| c.type_ == "Ready")
                        .map(|c| c.status == "True")
                })
                .unwrap_or(false);
            json!({
                "name": node.name_any(),
                "ready": ready,
                "os": info.map(|i| i.operating_system.clone()),
                "arch": info.map(|i| i.architecture.clone()),
                "kubelet_version": info.map(|i| i.kubelet_version.clone()),
            })
        })
        .collect();
    Ok(Json(json!({ "nodes": items })))
}

pub async fn operator(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), OPERATOR_NAMESPACE);
    match deployments.get_opt(OPERATOR_DEPLOYMENT).await? {
        Some(deployment) => {
            let image = deployment
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|s| s.containers.first())
                .and_then(|c| c.image.clone());
            Ok(Json(json!({
                "installed": true,
                "ready": deployment_ready(&deployment),
                "image": image,
            })))
        }
        None => Ok(Json(json!({ "installed": false, "ready": false }))),
    }
}

pub async fn registry(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let services: Api<Service> = Api::all(state.client.clone());
    let list = services.list(&ListParams::default()).await?;
    let registry = list.items.iter().find(|s| s.name_any() == "registry");
    Ok(Json(match registry {
        Some(service) => json!({
            "configured": state.settings.cluster.registry,
            "found": true,
            "namespace": service.namespace(),
            "cluster_ip": service.spec.as_ref().and_then(|s| s.cluster_ip.clone()),
            "ports": service.spec.as_ref().and_then(|s| s.ports.as_ref()).map(|ports| {
                ports.iter().map(|p| p.port).collect::<Vec<_>>()
            }),
        }),
        None => json!({
            "configured": state.settings.cluster.registry,
            "found": false,
        }),
    }))
}

pub async fn ingress_controller(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let namespace = &state.settings.cluster.ingress_controller;
    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), namespace);
    let list = deployments.list(&ListParams::default()).await?;
    let controller = list
        .items
        .iter()
        .find(|d| d.name_any().contains("controller"));
    Ok(Json(match controller {
        Some(deployment) => json!({
            "namespace": namespace,
            "found": true,
            "name": deployment.name_any(),
            "ready": deployment_ready(deployment),
        }),
        None => json!({ "namespace": namespace, "found": false }),
    }))
}

fn condition_status(conditions: &[crate::dse::models::StatusCondition], kind: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.kind == kind)
        .map(|c| c.is_true())
        .unwrap_or(false)
}

pub async fn dses(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let dses: Api<DevStagingEnvironment> = Api::all(state.client.clone());
    let list = dses.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|dse| {
            let conditions = dse
                .status
                .as_ref()
                .map(|s| s.conditions.clone())
                .unwrap_or_default();
            json!({
                "name": dse.name_any(),
                "namespace": dse.namespace(),
                "image": dse.spec.deployment.image,
                "port": dse.spec.deployment.port,
                "host": dse.spec.ingress.as_ref().map(|i| i.host.clone()),
                "dependencies": dse.spec.dependencies.iter().map(|d| d.kind.clone()).collect::<Vec<_>>(),
                "ready": condition_status(&conditions, "Ready"),
                "conditions": conditions,
            })
        })
        .collect();
    Ok(Json(json!({ "dses": items })))
}

pub async fn runners(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pools: Api<CIRunnerPool> = Api::all(state.client.clone());
    let list = pools.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|pool| {
            json!({
                "name": pool.name_any(),
                "namespace": pool.namespace(),
                "username": pool.spec.github_username,
                "repository": pool.spec.repository,
                "provider": if pool.spec.ci_provider.is_empty() {
                    crate::providers::DEFAULT_PROVIDER.to_string()
                } else {
                    pool.spec.ci_provider.clone()
                },
                "replicas": pool.spec.replicas,
                "ready_runners": pool.status.as_ref().map(|s| s.ready_runners).unwrap_or(0),
                "registered": pool.status.as_ref().map(|s| s.runner_registered).unwrap_or(false),
                "active_job": pool.status.as_ref().map(|s| s.active_job.clone()).unwrap_or_default(),
            })
        })
        .collect();
    Ok(Json(json!({ "runners": items })))
}

pub async fn deployments(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deployments: Api<Deployment> = Api::all(state.client.clone());
    let list = deployments.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|d| {
            json!({
                "name": d.name_any(),
                "namespace": d.namespace(),
                "replicas": d.spec.as_ref().and_then(|s| s.replicas),
                "available": d.status.as_ref().and_then(|s| s.available_replicas).unwrap_or(0),
                "image": d.spec.as_ref()
                    .and_then(|s| s.template.spec.as_ref())
                    .and_then(|s| s.containers.first())
                    .and_then(|c| c.image.clone()),
                "ready": deployment_ready(d),
            })
        })
        .collect();
    Ok(Json(json!({ "deployments": items })))
}

pub async fn pods(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pods: Api<Pod> = Api::all(state.client.clone());
    let list = pods.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|pod| {
            let restarts: i32 = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
                .unwrap_or(0);
            json!({
                "name": pod.name_any(),
                "namespace": pod.namespace(),
                "phase": pod.status.as_ref().and_then(|s| s.phase.clone()),
                "node": pod.spec.as_ref().and_then(|s| s.node_name.clone()),
                "restarts": restarts,
                "containers": pod.spec.as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        })
        .collect();
    Ok(Json(json!({ "pods": items })))
}

pub async fn services(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let services: Api<Service> = Api::all(state.client.clone());
    let list = services.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|service| {
            json!({
                "name": service.name_any(),
                "namespace": service.namespace(),
                "type": service.spec.as_ref().and_then(|s| s.type_.clone()),
                "cluster_ip": service.spec.as_ref().and_then(|s| s.cluster_ip.clone()),
                "ports": service.spec.as_ref().and_then(|s| s.ports.as_ref()).map(|ports| {
                    ports.iter().map(|p| p.port).collect::<Vec<_>>()
                }),
            })
        })
        .collect();
    Ok(Json(json!({ "services": items })))
}

pub async fn ingresses(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ingresses: Api<Ingress> = Api::all(state.client.clone());
    let list = ingresses.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|ingress| {
            let hosts: Vec<String> = ingress
                .spec
                .as_ref()
                .and_then(|s| s.rules.as_ref())
                .map(|rules| rules.iter().filter_map(|r| r.host.clone()).collect())
                .unwrap_or_default();
            json!({
                "name": ingress.name_any(),
                "namespace": ingress.namespace(),
                "class": ingress.spec.as_ref().and_then(|s| s.ingress_class_name.clone()),
                "hosts": hosts,
                "admitted": ingress.status.as_ref()
                    .and_then(|s| s.load_balancer.as_ref())
                    .and_then(|lb| lb.ingress.as_ref())
                    .map(|entries| !entries.is_empty())
                    .unwrap_or(false),
            })
        })
        .collect();
    Ok(Json(json!({ "ingresses": items })))
}

/// Secret values are never returned; only key names with a redaction marker
pub async fn secrets(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let secrets: Api<Secret> = Api::all(state.client.clone());
    let list = secrets.list(&ListParams::default()).await?;
    let items: Vec<Value> = list
        .items
        .iter()
        .map(|secret| {
            let keys: Vec<String> = secret
                .data
                .as_ref()
                .map(|d| d.keys().cloned().collect())
                .unwrap_or_default();
            json!({
                "name": secret.name_any(),
                "namespace": secret.namespace(),
                "type": secret.type_,
                "keys": keys,
                "values": "REDACTED",
            })
        })
        .collect();
    Ok(Json(json!({ "secrets": items })))
}

/// Events, newest first
pub async fn events(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let events: Api<Event> = Api::all(state.client.clone());
    let mut list = events.list(&ListParams::default()).await?.items;
    list.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
    let items: Vec<Value> = list
        .iter()
        .map(|event| {
            json!({
                "namespace": event.namespace(),
                "type": event.type_,
                "reason": event.reason,
                "message": event.message,
                "object": format!(
                    "{}/{}",
                    event.involved_object.kind.clone().unwrap_or_default(),
                    event.involved_object.name.clone().unwrap_or_default()
                ),
                "last_seen": event.last_timestamp.as_ref().map(|t| t.0.to_rfc3339()),
            })
        })
        .collect();
    Ok(Json(json!({ "events": items })))
}

pub async fn namespaces(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let namespaces: Api<Namespace> = Api::all(state.client.clone());
    let list = namespaces.list(&ListParams::default()).await?;
    let items: Vec<String> = list.items.iter().map(|ns| ns.name_any()).collect();
    Ok(Json(json!({ "namespaces": items })))
}

pub async fn logs(
    State(state): State<AppState>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let pods: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    let params = LogParams {
        container: query.container.clone(),
        tail_lines: Some(query.tail),
        ..Default::default()
    };
    let logs = pods.logs(&pod, &params).await?;
    Ok(Json(json!({
        "pod": pod,
        "namespace": namespace,
        "container": query.container,
        "logs": logs,
    })))
}

pub async fn env_list(
    State(state): State<AppState>,
    Path((namespace, deployment)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), &namespace);
    let deployment = deployments
        .get_opt(&deployment)
        .await?
        .ok_or_else(|| ApiError::not_found("deployment not found"))?;

    let mut env_items = Vec::new();
    if let Some(pod_spec) = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
    {
        for container in &pod_spec.containers {
            for var in container.env.as_deref().unwrap_or_default() {
                env_items.push(json!({
                    "container": container.name,
                    "name": var.name,
                    "value": var.value,
                    "from_secret": var.value_from.as_ref()
                        .and_then(|v| v.secret_key_ref.as_ref())
                        .map(|s| format!("{}/{}", s.name.clone(), s.key)),
                }));
            }
        }
    }
    Ok(Json(json!({ "env": env_items })))
}

/// Runtime detection report for a deployment, optionally informed by a local
/// source directory.
pub async fn runtime(
    State(state): State<AppState>,
    Path((namespace, deployment)): Path<(String, String)>,
    Query(query): Query<RuntimeQuery>,
) -> Result<Json<RuntimeReport>, ApiError> {
    let options = SyncOptions {
        deployment,
        namespace,
        src: query.src.clone().unwrap_or_else(|| ".".to_string()).into(),
        dest: SyncOptions::default_dest().to_string(),
        container: None,
        restart: false,
    };
    let engine = SyncEngine::new(options, state.settings.sync.clone());
    let (detected, _pod, container) = engine
        .detect_runtime()
        .await
        .internal_err("runtime detection failed")?;

    let mode = detected.mode();
    Ok(Json(RuntimeReport {
        runtime: detected.runtime.clone(),
        mode: sync::mode_str(mode),
        strategy: sync::strategy_str(mode),
        sync_supported: detected.profile.is_some() || detected.is_frontend,
        language: detected
            .profile
            .as_ref()
            .map(|p| p.language.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        is_frontend: detected.is_frontend,
        container,
        default_dest: SyncOptions::default_dest(),
    }))
}

/// Discover service directories and persist the context document
pub async fn load_context(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let services =
        context::discover_services(&state.repo_root).internal_err("service discovery failed")?;
    let intel: Option<Value> =
        workspace::read_state(&workspace::intel_state_path(&state.repo_root)).unwrap_or(None);
    let document = json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "services": services,
        "intel": intel,
    });
    workspace::write_state(
        &workspace::context_document_path(&state.repo_root),
        &document,
    )
    .internal_err("failed to persist context document")?;
    Ok(Json(document))
}

pub async fn expose_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tunnel = state.tunnel.lock().await;
    Ok(Json(match tunnel.as_ref() {
        Some(handle) => json!({ "active": true, "tunnel": handle.descriptor }),
        None => json!({ "active": false }),
    }))
}

pub async fn sync_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sync = state.sync.lock().await;
    Ok(Json(match sync.as_ref() {
        Some(handle) => json!({ "active": true, "session": handle.info }),
        None => json!({ "active": false }),
    }))
}
