use super::models::{DevStagingEnvironment, DevStagingEnvironmentStatus, StatusCondition};
use super::resources::{self, ResolvedDependency};
use super::status;
use crate::deps::{self, Credentials, DependencyWorkload, WorkloadKind};
use crate::error::{Error, Result};
use crate::k8s::apply::apply_owned;
use crate::k8s::{events, naming, SPEC_HASH_ANNOTATION};
use crate::settings::OperatorSettings;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Context shared by all DSE reconciles
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub settings: OperatorSettings,
}

/// Initialize the DSE controller (given the CRD is installed)
pub async fn run(client: Client, settings: OperatorSettings) {
    let dses = Api::<DevStagingEnvironment>::all(client.clone());
    if let Err(e) = dses.list(&ListParams::default().limit(1)).await {
        error!("DevStagingEnvironment CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: kindling crd | kubectl apply -f -");
        std::process::exit(1);
    }

    let context = Arc::new(Context {
        client: client.clone(),
        settings,
    });

    Controller::new(dses, watcher::Config::default().any_semantic())
        .owns(
            Api::<Deployment>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<StatefulSet>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<Service>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<Ingress>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<Secret>::all(client.clone()),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[instrument(skip(dse, ctx), fields(name = %dse.name_any(), namespace = ?dse.namespace()))]
async fn reconcile(dse: Arc<DevStagingEnvironment>, ctx: Arc<Context>) -> Result<Action> {
    // Deletion cascades through owner references; nothing to do here.
    if dse.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let namespace = dse.namespace().ok_or_else(|| {
        Error::Validation("DevStagingEnvironment must be namespaced".to_string())
    })?;
    let name = dse.name_any();
    debug!("reconciling DevStagingEnvironment {}/{}", namespace, name);

    let recorder = events::recorder(ctx.client.clone(), dse.as_ref());

    match reconcile_inner(&dse, &ctx, &namespace, &name).await {
        Ok(new_status) => {
            patch_status(&ctx.client, &namespace, &name, &new_status).await?;
            Ok(Action::requeue(Duration::from_secs(
                ctx.settings.requeue_interval_secs,
            )))
        }
        Err(e) if e.is_terminal() => {
            // Terminal until the spec changes: publish the condition and the
            // Event, then wait for the next watch event instead of hot-looping.
            warn!("terminal reconcile failure for {}/{}: {}", namespace, name, e);
            events::warn_event(&recorder, e.reason(), "Reconciling", e.to_string()).await;
            let failed = failed_status(&e);
            patch_status(&ctx.client, &namespace, &name, &failed).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            // Transient: record the condition, then let the controller
            // runtime re-enqueue with backoff.
            let failed = failed_status(&e);
            if let Err(patch_err) = patch_status(&ctx.client, &namespace, &name, &failed).await {
                warn!("failed to record error status for {}: {}", name, patch_err);
            }
            Err(e)
        }
    }
}

fn error_policy(
    _dse: Arc<DevStagingEnvironment>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    warn!("reconcile failed: {:?}", error);
    Action::requeue(Duration::from_secs(
        ctx.settings.error_requeue_interval_secs,
    ))
}

fn failed_status(error: &Error) -> DevStagingEnvironmentStatus {
    DevStagingEnvironmentStatus {
        conditions: vec![StatusCondition::new(
            status::CONDITION_READY,
            false,
            error.reason(),
            error.to_string(),
        )],
        observed_spec_hash: String::new(),
    }
}

async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    new_status: &DevStagingEnvironmentStatus,
) -> Result<()> {
    let api: Api<DevStagingEnvironment> = Api::namespaced(client.clone(), namespace);
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": new_status })),
    )
    .await?;
    Ok(())
}

/// Resolve the declared dependencies against the registry, materialising
/// credentials as needed. Unknown kinds are skipped with a warning event.
async fn resolve_dependencies(
    dse: &DevStagingEnvironment,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<(Vec<ResolvedDependency>, Vec<String>)> {
    let recorder = events::recorder(ctx.client.clone(), dse);
    let owner_ref = resources::owner_reference(dse);
    let mut resolved = Vec::new();
    let mut invalid = Vec::new();

    for dep in &dse.spec.dependencies {
        let Some(kind) = deps::lookup(&dep.kind) else {
            warn!("unknown dependency type '{}' on {}", dep.kind, name);
            events::warn_event(
                &recorder,
                "DependencyInvalid",
                "Reconciling",
                format!(
                    "unknown dependency type '{}' (registered: {})",
                    dep.kind,
                    deps::known_kinds().join(", ")
                ),
            )
            .await;
            invalid.push(dep.kind.clone());
            continue;
        };

        let explicit = dep.credentials.as_ref().map(|c| Credentials {
            user: c.user.clone(),
            password: c.password.clone(),
            database: c.database.clone(),
        });
        let credentials = if kind.needs_credentials {
            deps::materialise_credentials(
                ctx.client.clone(),
                namespace,
                name,
                &dep.kind,
                explicit,
                &owner_ref,
                &resources::dependency_labels(name, &dep.kind),
            )
            .await?
        } else {
            Credentials::default()
        };

        resolved.push(ResolvedDependency {
            dep_type: dep.kind.clone(),
            image: resources::resolve_image(&kind, dep.version.as_deref()),
            port: dep.port.unwrap_or(kind.port),
            env_var_name: dep
                .env_var_name
                .clone()
                .unwrap_or_else(|| kind.env_var_name.clone()),
            kind,
            credentials,
        });
    }

    Ok((resolved, invalid))
}

async fn reconcile_inner(
    dse: &DevStagingEnvironment,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<DevStagingEnvironmentStatus> {
    let uid = dse.meta().uid.clone().unwrap_or_default();
    let owner_ref = resources::owner_reference(dse);

    // Dependencies first: credentials feed both the workloads and the hash
    let (resolved, invalid) = resolve_dependencies(dse, ctx, namespace, name).await?;

    let fingerprints: BTreeMap<String, String> = resolved
        .iter()
        .map(|dep| (dep.dep_type.clone(), dep.credentials.fingerprint()))
        .collect();
    let hash = resources::compute_spec_hash(&dse.spec, &fingerprints)?;

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    let ingresses: Api<Ingress> = Api::namespaced(ctx.client.clone(), namespace);

    // Dependency workloads and Services
    for dep in &resolved {
        let dep_name = naming::dependency_name(name, &dep.dep_type);
        let labels = resources::dependency_labels(name, &dep.dep_type);
        let annotations = resources::hash_annotations(&hash);

        let workload = deps::build_dependency_workload(
            &dep_name,
            namespace,
            &dep.dep_type,
            &dep.kind,
            dep.image.clone(),
            dep.port,
            &dep.credentials,
            labels.clone(),
            annotations.clone(),
            &owner_ref,
        );
        match workload {
            DependencyWorkload::Deployment(deployment) => {
                apply_owned(
                    &deployments,
                    &dep_name,
                    &deployment,
                    SPEC_HASH_ANNOTATION,
                    &hash,
                    &uid,
                    false,
                )
                .await?;
            }
            DependencyWorkload::StatefulSet(statefulset) => {
                apply_owned(
                    &statefulsets,
                    &dep_name,
                    &statefulset,
                    SPEC_HASH_ANNOTATION,
                    &hash,
                    &uid,
                    false,
                )
                .await?;
            }
        }

        let service = deps::build_dependency_service(
            &dep_name,
            namespace,
            dep.port,
            labels,
            annotations,
            &owner_ref,
        );
        apply_owned(
            &services,
            &dep_name,
            &service,
            SPEC_HASH_ANNOTATION,
            &hash,
            &uid,
            false,
        )
        .await?;
    }

    // App Deployment with composed env and wait-for init containers
    let env = resources::compose_app_env(name, &resolved, &dse.spec.deployment.env);
    let init_containers = resources::wait_for_init_containers(name, &resolved);
    let app_deployment = resources::build_app_deployment(dse, env, init_containers, &hash);
    apply_owned(
        &deployments,
        name,
        &app_deployment,
        SPEC_HASH_ANNOTATION,
        &hash,
        &uid,
        false,
    )
    .await?;

    // App Service
    let app_service = resources::build_app_service(dse, &hash);
    apply_owned(
        &services,
        name,
        &app_service,
        SPEC_HASH_ANNOTATION,
        &hash,
        &uid,
        false,
    )
    .await?;

    // Optional Ingress
    if let Some(ingress_spec) = &dse.spec.ingress {
        let ingress = resources::build_ingress(dse, ingress_spec, &hash);
        apply_owned(
            &ingresses,
            name,
            &ingress,
            SPEC_HASH_ANNOTATION,
            &hash,
            &uid,
            false,
        )
        .await?;
    }

    // Observe and aggregate status
    let observed_app = deployments.get_opt(name).await?;
    let deployment_condition =
        status::deployment_condition(observed_app.as_ref(), dse.spec.deployment.replicas);

    let mut dep_states = Vec::new();
    for dep in &resolved {
        let dep_name = naming::dependency_name(name, &dep.dep_type);
        let ready = match dep.kind.workload_kind {
            WorkloadKind::Deployment => deployments
                .get_opt(&dep_name)
                .await?
                .and_then(|d| d.status)
                .and_then(|s| s.available_replicas)
                .unwrap_or(0)
                > 0,
            WorkloadKind::StatefulSet => statefulsets
                .get_opt(&dep_name)
                .await?
                .and_then(|s| s.status)
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0)
                > 0,
        };
        dep_states.push((dep_name, ready));
    }
    let dependencies_condition = status::dependencies_condition(&dep_states, &invalid);

    let observed_ingress = if dse.spec.ingress.is_some() {
        ingresses.get_opt(name).await?
    } else {
        None
    };
    let ingress_condition =
        status::ingress_condition(observed_ingress.as_ref(), dse.spec.ingress.is_some());

    let ready = status::ready_condition(&[
        &deployment_condition,
        &dependencies_condition,
        &ingress_condition,
    ]);

    Ok(DevStagingEnvironmentStatus {
        conditions: vec![
            ready,
            deployment_condition,
            dependencies_condition,
            ingress_condition,
        ],
        observed_spec_hash: hash,
    })
}
