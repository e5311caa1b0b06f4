use super::models::{CIRunnerPool, CIRunnerPoolSpec};
use crate::error::{Error, Result};
use crate::k8s::hash::chained_hash;
use crate::k8s::RUNNER_POOL_HASH_ANNOTATION;
use crate::providers::{sanitize, RunnerAdapter, RunnerConfig, RunnerEnvVar};
use crate::settings::Settings;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;

/// Shared scratch volume between runner and build-agent
pub const BUILDS_VOLUME: &str = "builds";
pub const BUILDS_MOUNT_PATH: &str = "/builds";

const TERMINATION_GRACE_SECS: i64 = 30;

/// Resolve the spec into the provider-facing runner configuration.
///
/// `self-hosted` and the sanitised username always lead the label list so
/// workflows can target the runner without knowing the extra labels.
pub fn build_runner_config(
    spec: &CIRunnerPoolSpec,
    adapter: &dyn RunnerAdapter,
    cr_name: &str,
) -> RunnerConfig {
    let mut labels = vec!["self-hosted".to_string(), sanitize(&spec.github_username)];
    for label in &spec.labels {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    RunnerConfig {
        username: spec.github_username.clone(),
        repository: spec.repository.clone(),
        platform_url: spec.platform_url.clone(),
        token_secret_name: spec.token_secret_ref.name.clone(),
        token_secret_key: spec
            .token_secret_ref
            .key
            .clone()
            .unwrap_or_else(|| adapter.default_token_key().to_string()),
        labels,
        runner_group: spec.runner_group.clone(),
        work_dir: spec
            .work_dir
            .clone()
            .unwrap_or_else(|| adapter.default_work_dir().to_string()),
        cr_name: cr_name.to_string(),
    }
}

/// Fingerprint for the `runner-pool-spec-hash` annotation: spec JSON plus
/// provider name plus startup-script text, so provider upgrades roll the pod.
pub fn compute_pool_hash(
    spec: &CIRunnerPoolSpec,
    provider_name: &str,
    startup_script: &str,
) -> Result<String> {
    let spec_json = serde_json::to_vec(spec)?;
    Ok(chained_hash(&[
        &spec_json,
        provider_name.as_bytes(),
        startup_script.as_bytes(),
    ]))
}

fn to_env_var(var: &RunnerEnvVar) -> EnvVar {
    match &var.secret_ref {
        Some((secret, key)) => EnvVar {
            name: var.name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.clone(),
                    key: key.clone(),
                    optional: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        None => EnvVar {
            name: var.name.clone(),
            value: var.value.clone(),
            ..Default::default()
        },
    }
}

fn runner_resources(spec: &CIRunnerPoolSpec) -> Option<ResourceRequirements> {
    let resources = spec.resources.as_ref()?;
    let to_quantities = |map: &BTreeMap<String, String>| -> Option<BTreeMap<String, Quantity>> {
        (!map.is_empty()).then(|| {
            map.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect()
        })
    };
    Some(ResourceRequirements {
        requests: to_quantities(&resources.requests),
        limits: to_quantities(&resources.limits),
        ..Default::default()
    })
}

/// Compose the two-container runner Deployment: the provider's runner image
/// driven by its startup script, and the build-agent sidecar sharing the
/// `builds` emptyDir.
pub fn build_runner_deployment(
    pool: &CIRunnerPool,
    adapter: &dyn RunnerAdapter,
    config: &RunnerConfig,
    hash: &str,
    settings: &Settings,
) -> Result<Deployment> {
    let namespace = pool.metadata.namespace.clone().unwrap_or_default();
    let name = adapter.deployment_name(&config.username);
    let labels = adapter.runner_labels(&config.username, &config.cr_name);
    let owner_ref: OwnerReference = pool
        .controller_owner_ref(&())
        .expect("CIRunnerPool has a controller owner ref");

    let mut annotations = BTreeMap::new();
    annotations.insert(RUNNER_POOL_HASH_ANNOTATION.to_string(), hash.to_string());

    // Runner container
    let mut runner_env: Vec<EnvVar> = adapter
        .runner_env_vars(config)
        .iter()
        .map(to_env_var)
        .collect();
    runner_env.extend(pool.spec.env.iter().map(|e| EnvVar {
        name: e.name.clone(),
        value: Some(e.value.clone()),
        ..Default::default()
    }));

    let mut runner_mounts = vec![VolumeMount {
        name: BUILDS_VOLUME.to_string(),
        mount_path: BUILDS_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    for mount in &pool.spec.volume_mounts {
        let parsed: VolumeMount = serde_json::from_value(mount.clone())
            .map_err(|e| Error::Validation(format!("invalid volumeMount: {}", e)))?;
        runner_mounts.push(parsed);
    }

    let runner_container = Container {
        name: "runner".to_string(),
        image: Some(
            pool.spec
                .runner_image
                .clone()
                .unwrap_or_else(|| adapter.default_image().to_string()),
        ),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            adapter.startup_script().to_string(),
        ]),
        env: Some(runner_env),
        resources: runner_resources(&pool.spec),
        volume_mounts: Some(runner_mounts),
        ..Default::default()
    };

    // Build-agent sidecar: runs with the pod ServiceAccount and performs the
    // privileged operations the runner itself is never allowed to.
    let build_agent_container = Container {
        name: "build-agent".to_string(),
        image: Some(settings.operator.kindling_image.clone()),
        command: Some(vec!["kindling".to_string(), "build-agent".to_string()]),
        env: Some(vec![
            EnvVar {
                name: "KINDLING_CLUSTER__REGISTRY".to_string(),
                value: Some(settings.cluster.registry.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "KINDLING_CLUSTER__CACHE_REPO".to_string(),
                value: Some(settings.cluster.cache_repo.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "KINDLING_BUILD__TIMEOUT_SECS".to_string(),
                value: Some(settings.build.timeout_secs.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: BUILDS_VOLUME.to_string(),
            mount_path: BUILDS_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let mut volumes = vec![Volume {
        name: BUILDS_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    for volume in &pool.spec.volumes {
        let parsed: Volume = serde_json::from_value(volume.clone())
            .map_err(|e| Error::Validation(format!("invalid volume: {}", e)))?;
        volumes.push(parsed);
    }

    let service_account = pool
        .spec
        .service_account_name
        .clone()
        .unwrap_or_else(|| adapter.service_account_name(&config.username));

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(pool.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account),
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_SECS),
                    containers: vec![runner_container, build_agent_container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers;
    use crate::runner::models::TokenSecretRef;
    use kube::core::ObjectMeta as KubeObjectMeta;

    fn test_pool() -> CIRunnerPool {
        let spec: CIRunnerPoolSpec = serde_json::from_value(serde_json::json!({
            "githubUsername": "Alice.Dev",
            "repository": "alice/demo",
            "tokenSecretRef": {"name": "pat", "key": "github-token"}
        }))
        .unwrap();
        let mut pool = CIRunnerPool::new("alice-pool", spec);
        pool.metadata = KubeObjectMeta {
            name: Some("alice-pool".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("uid-2".to_string()),
            ..Default::default()
        };
        pool
    }

    #[test]
    fn test_runner_config_labels() {
        let provider = providers::get("github").unwrap();
        let pool = test_pool();
        let config = build_runner_config(&pool.spec, provider.runner(), "alice-pool");
        assert_eq!(config.labels[0], "self-hosted");
        assert_eq!(config.labels[1], "alice-dev");
        assert_eq!(config.token_secret_key, "github-token");
    }

    #[test]
    fn test_two_containers_share_builds_volume() {
        let provider = providers::get("github").unwrap();
        let pool = test_pool();
        let config = build_runner_config(&pool.spec, provider.runner(), "alice-pool");
        let settings = Settings {
            cluster: Default::default(),
            dashboard: Default::default(),
            operator: Default::default(),
            build: Default::default(),
            sync: Default::default(),
            expose: Default::default(),
        };
        let deployment =
            build_runner_deployment(&pool, provider.runner(), &config, "abc", &settings).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("alice-dev-runner"));
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.termination_grace_period_seconds, Some(30));
        assert_eq!(pod.service_account_name.as_deref(), Some("alice-dev-runner"));

        let names: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["runner", "build-agent"]);
        for container in &pod.containers {
            let mounts = container.volume_mounts.as_ref().unwrap();
            assert!(mounts
                .iter()
                .any(|m| m.name == "builds" && m.mount_path == "/builds"));
        }

        let runner = &pod.containers[0];
        let env = runner.env.as_ref().unwrap();
        let pat = env.iter().find(|e| e.name == "GITHUB_PAT").unwrap();
        let secret_ref = pat
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(secret_ref.name, "pat");
        assert_eq!(secret_ref.key, "github-token");
    }

    #[test]
    fn test_pool_hash_sensitive_to_script() {
        let pool = test_pool();
        let a = compute_pool_hash(&pool.spec, "github", "script-a").unwrap();
        let b = compute_pool_hash(&pool.spec, "github", "script-b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
    }
}
