use super::deployment::{build_runner_config, build_runner_deployment, compute_pool_hash};
use super::models::{CIRunnerPool, CIRunnerPoolStatus};
use super::rbac;
use crate::dse::models::StatusCondition;
use crate::error::{Error, Result};
use crate::k8s::apply::{apply, apply_owned};
use crate::k8s::{events, RUNNER_POOL_HASH_ANNOTATION};
use crate::providers;
use crate::settings::Settings;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const RUNNER_POOL_FINALIZER: &str = "cirunnerpools.apps.example.com";

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub settings: Settings,
}

/// Initialize the CIRunnerPool controller (given the CRD is installed)
pub async fn run(client: Client, settings: Settings) {
    let pools = Api::<CIRunnerPool>::all(client.clone());
    if let Err(e) = pools.list(&ListParams::default().limit(1)).await {
        error!("CIRunnerPool CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: kindling crd | kubectl apply -f -");
        std::process::exit(1);
    }

    let context = Arc::new(Context {
        client: client.clone(),
        settings,
    });

    Controller::new(pools, watcher::Config::default().any_semantic())
        .owns(
            Api::<Deployment>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<ServiceAccount>::all(client.clone()),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[instrument(skip(pool, ctx), fields(name = %pool.name_any(), namespace = ?pool.namespace()))]
async fn reconcile(pool: Arc<CIRunnerPool>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = pool
        .namespace()
        .ok_or_else(|| Error::Validation("CIRunnerPool must be namespaced".to_string()))?;
    let pools: Api<CIRunnerPool> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&pools, RUNNER_POOL_FINALIZER, pool, |event| async {
        match event {
            Finalizer::Apply(pool) => apply_pool(&pool, &ctx).await,
            Finalizer::Cleanup(pool) => cleanup_pool(&pool, &ctx).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

fn error_policy(_pool: Arc<CIRunnerPool>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("runner pool reconcile failed: {:?}", error);
    Action::requeue(Duration::from_secs(
        ctx.settings.operator.error_requeue_interval_secs,
    ))
}

fn validate(pool: &CIRunnerPool) -> Result<()> {
    if pool.spec.github_username.trim().is_empty() {
        return Err(Error::Validation("githubUsername must not be empty".into()));
    }
    if pool.spec.repository.trim().is_empty() {
        return Err(Error::Validation("repository must not be empty".into()));
    }
    Ok(())
}

async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    new_status: &CIRunnerPoolStatus,
) -> Result<()> {
    let api: Api<CIRunnerPool> = Api::namespaced(client.clone(), namespace);
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": new_status })),
    )
    .await?;
    Ok(())
}

fn failed_status(error: &Error) -> CIRunnerPoolStatus {
    CIRunnerPoolStatus {
        conditions: vec![StatusCondition::new(
            "Ready",
            false,
            error.reason(),
            error.to_string(),
        )],
        ..Default::default()
    }
}

async fn apply_pool(pool: &CIRunnerPool, ctx: &Context) -> Result<Action> {
    let namespace = pool.namespace().unwrap_or_default();
    let name = pool.name_any();
    let recorder = events::recorder(ctx.client.clone(), pool);

    match apply_pool_inner(pool, ctx, &namespace, &name).await {
        Ok(new_status) => {
            patch_status(&ctx.client, &namespace, &name, &new_status).await?;
            Ok(Action::requeue(Duration::from_secs(
                ctx.settings.operator.requeue_interval_secs,
            )))
        }
        Err(e) if e.is_terminal() => {
            warn!("terminal reconcile failure for pool {}: {}", name, e);
            events::warn_event(&recorder, e.reason(), "Reconciling", e.to_string()).await;
            patch_status(&ctx.client, &namespace, &name, &failed_status(&e)).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            if let Err(patch_err) =
                patch_status(&ctx.client, &namespace, &name, &failed_status(&e)).await
            {
                warn!("failed to record error status for {}: {}", name, patch_err);
            }
            Err(e)
        }
    }
}

async fn apply_pool_inner(
    pool: &CIRunnerPool,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<CIRunnerPoolStatus> {
    validate(pool)?;

    // The PAT Secret must exist before anything is materialised
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let secret_name = &pool.spec.token_secret_ref.name;
    if secrets.get_opt(secret_name).await?.is_none() {
        return Err(Error::MissingReference(format!(
            "token Secret \"{}\" not found in namespace \"{}\"",
            secret_name, namespace
        )));
    }

    let provider = providers::get(&pool.spec.ci_provider)
        .map_err(|e| Error::Validation(e.to_string()))?;
    let adapter = provider.runner();
    let config = build_runner_config(&pool.spec, adapter, name);
    let hash = compute_pool_hash(&pool.spec, provider.name(), adapter.startup_script())?;
    let uid = pool.meta().uid.clone().unwrap_or_default();

    let base_name = adapter.deployment_name(&config.username);
    let labels = adapter.runner_labels(&config.username, name);
    let owner_ref = pool
        .controller_owner_ref(&())
        .expect("CIRunnerPool has a controller owner ref");

    // RBAC: one ServiceAccount + ClusterRole + ClusterRoleBinding per pool,
    // rewritten in place on change rather than duplicated.
    let service_accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
    let sa = rbac::build_service_account(&base_name, namespace, labels.clone(), &owner_ref);
    apply(&service_accounts, &base_name, &sa).await?;

    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let role = rbac::build_cluster_role(&adapter.cluster_role_name(&config.username), labels.clone());
    apply(&cluster_roles, &adapter.cluster_role_name(&config.username), &role).await?;

    let bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let binding = rbac::build_cluster_role_binding(
        &adapter.cluster_role_binding_name(&config.username),
        namespace,
        labels.clone(),
    );
    apply(
        &bindings,
        &adapter.cluster_role_binding_name(&config.username),
        &binding,
    )
    .await?;

    // Runner Deployment, short-circuited on an unchanged pool hash
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    let deployment = build_runner_deployment(pool, adapter, &config, &hash, &ctx.settings)?;
    apply_owned(
        &deployments,
        &base_name,
        &deployment,
        RUNNER_POOL_HASH_ANNOTATION,
        &hash,
        &uid,
        false,
    )
    .await?;

    // Status mirrors the Deployment
    let observed = deployments.get_opt(&base_name).await?;
    let available = observed
        .as_ref()
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    let registered = available == pool.spec.replicas && available > 0;

    debug!(
        "pool {} runners: {}/{} available",
        name, available, pool.spec.replicas
    );

    let condition = if registered {
        StatusCondition::new(
            "Ready",
            true,
            "RunnerRegistered",
            format!("{}/{} runners available", available, pool.spec.replicas),
        )
    } else {
        StatusCondition::new(
            "Ready",
            false,
            "RunnersUnavailable",
            format!("{}/{} runners available", available, pool.spec.replicas),
        )
    };

    Ok(CIRunnerPoolStatus {
        replicas: pool.spec.replicas,
        ready_runners: available,
        runner_registered: registered,
        active_job: pool
            .status
            .as_ref()
            .map(|s| s.active_job.clone())
            .unwrap_or_default(),
        conditions: vec![condition],
    })
}

/// Delete the cluster-scoped RBAC on pool deletion; everything namespaced is
/// garbage-collected through owner references.
async fn cleanup_pool(pool: &CIRunnerPool, ctx: &Context) -> Result<Action> {
    let provider = providers::get(&pool.spec.ci_provider).unwrap_or_else(|_| {
        providers::get(providers::DEFAULT_PROVIDER).expect("default provider is registered")
    });
    let adapter = provider.runner();
    let username = &pool.spec.github_username;

    let recorder = events::recorder(ctx.client.clone(), pool);
    events::normal_event(
        &recorder,
        "DeletingRunnerPool",
        "Deleting",
        format!("removing cluster RBAC for pool {}", pool.name_any()),
    )
    .await;

    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    match cluster_roles
        .delete(&adapter.cluster_role_name(username), &DeleteParams::default())
        .await
    {
        Ok(_) => info!("deleted ClusterRole {}", adapter.cluster_role_name(username)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    let bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    match bindings
        .delete(
            &adapter.cluster_role_binding_name(username),
            &DeleteParams::default(),
        )
        .await
    {
        Ok(_) => info!(
            "deleted ClusterRoleBinding {}",
            adapter.cluster_role_binding_name(username)
        ),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::models::CIRunnerPoolSpec;

    fn pool_with(username: &str, repository: &str) -> CIRunnerPool {
        let spec: CIRunnerPoolSpec = serde_json::from_value(serde_json::json!({
            "githubUsername": username,
            "repository": repository,
            "tokenSecretRef": {"name": "pat"}
        }))
        .unwrap();
        CIRunnerPool::new("pool", spec)
    }

    #[test]
    fn test_validate_rejects_empty_identity() {
        assert!(validate(&pool_with("", "alice/demo")).is_err());
        assert!(validate(&pool_with("  ", "alice/demo")).is_err());
        assert!(validate(&pool_with("alice", "")).is_err());
        assert!(validate(&pool_with("alice", "alice/demo")).is_ok());
    }

    #[test]
    fn test_failed_status_carries_reason() {
        let status = failed_status(&Error::MissingReference("token Secret \"pat\" not found".into()));
        assert_eq!(status.conditions[0].reason, "MissingReference");
        assert_eq!(status.conditions[0].status, "False");
        assert!(!status.runner_registered);
    }
}
