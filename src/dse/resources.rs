use super::models::{AppIngress, DevStagingEnvironment, DevStagingEnvironmentSpec};
use crate::deps::{Credentials, DependencyKind};
use crate::k8s::{naming, probes, SPEC_HASH_ANNOTATION};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const WAIT_IMAGE: &str = "busybox:1.36";
const WAIT_RETRIES: u32 = 60;
const WAIT_SLEEP_SECS: u32 = 2;

/// A dependency that passed registry lookup, with per-spec overrides and
/// materialised credentials resolved.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub dep_type: String,
    pub kind: Arc<DependencyKind>,
    pub image: String,
    pub port: i32,
    pub env_var_name: String,
    pub credentials: Credentials,
}

impl ResolvedDependency {
    /// Service DNS name of this dependency inside the namespace
    pub fn host(&self, owner: &str) -> String {
        naming::dependency_name(owner, &self.dep_type)
    }
}

/// Apply a `version` override to the registry's default image tag
pub fn resolve_image(kind: &DependencyKind, version: Option<&str>) -> String {
    match version {
        Some(version) => {
            let base = kind.image.split(':').next().unwrap_or(&kind.image);
            format!("{}:{}", base, version)
        }
        None => kind.image.clone(),
    }
}

/// Controller owner reference for a DSE
pub fn owner_reference(dse: &DevStagingEnvironment) -> OwnerReference {
    dse.controller_owner_ref(&())
        .expect("DevStagingEnvironment has a controller owner ref")
}

/// Labels for the app workload: the DSE label set plus an app component so
/// selectors never match dependency pods.
pub fn app_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = naming::dse_labels(name);
    labels.insert("app.kubernetes.io/component".to_string(), "app".to_string());
    labels
}

/// Labels for a dependency workload
pub fn dependency_labels(name: &str, dep_type: &str) -> BTreeMap<String, String> {
    let mut labels = naming::dse_labels(name);
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        dep_type.to_string(),
    );
    labels
}

/// Annotation map carrying the spec hash
pub fn hash_annotations(hash: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(SPEC_HASH_ANNOTATION.to_string(), hash.to_string());
    annotations
}

#[derive(Serialize)]
struct HashInputs<'a> {
    spec: &'a DevStagingEnvironmentSpec,
    credential_fingerprints: &'a BTreeMap<String, String>,
}

/// Fingerprint of everything that feeds resource composition: the spec plus
/// a per-dependency credential fingerprint (never the values themselves).
pub fn compute_spec_hash(
    spec: &DevStagingEnvironmentSpec,
    credential_fingerprints: &BTreeMap<String, String>,
) -> Result<String, serde_json::Error> {
    crate::k8s::hash::spec_hash(&HashInputs {
        spec,
        credential_fingerprints,
    })
}

/// Build the ordered app environment: one connection URL per recognised
/// dependency first, then the user-supplied env verbatim. Later entries win
/// in Kubernetes, so user values override dependency-injected ones on
/// collision.
pub fn compose_app_env(
    owner: &str,
    resolved: &[ResolvedDependency],
    user_env: &[super::models::AppEnvVar],
) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = resolved
        .iter()
        .map(|dep| EnvVar {
            name: dep.env_var_name.clone(),
            value: Some(crate::deps::expand_url_template(
                &dep.kind.url_template,
                &dep.host(owner),
                dep.port,
                &dep.credentials,
            )),
            ..Default::default()
        })
        .collect();

    env.extend(user_env.iter().map(|var| EnvVar {
        name: var.name.clone(),
        value: Some(var.value.clone()),
        ..Default::default()
    }));

    env
}

/// One busybox init container per recognised dependency, polling the
/// dependency Service with `nc -z` under a bounded retry budget.
pub fn wait_for_init_containers(owner: &str, resolved: &[ResolvedDependency]) -> Vec<Container> {
    resolved
        .iter()
        .map(|dep| {
            let host = dep.host(owner);
            let script = format!(
                "i=0; until nc -z {host} {port}; do i=$((i+1)); \
                 if [ $i -ge {retries} ]; then echo \"timed out waiting for {host}:{port}\" >&2; exit 1; fi; \
                 sleep {sleep}; done",
                host = host,
                port = dep.port,
                retries = WAIT_RETRIES,
                sleep = WAIT_SLEEP_SECS,
            );
            Container {
                name: naming::wait_init_container_name(&dep.dep_type),
                image: Some(WAIT_IMAGE.to_string()),
                command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
                ..Default::default()
            }
        })
        .collect()
}

fn resource_requirements(spec: &DevStagingEnvironmentSpec) -> Option<ResourceRequirements> {
    let resources = spec.deployment.resources.as_ref()?;
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

fn app_probe(spec: &DevStagingEnvironmentSpec) -> Option<Probe> {
    let container_port = spec.deployment.port;
    let check = spec.deployment.health_check.clone().unwrap_or_default();
    let port = if check.port != 0 {
        check.port
    } else {
        container_port
    };
    match check.kind.as_str() {
        "" | "http" => {
            let path = if check.path.is_empty() {
                "/"
            } else {
                &check.path
            };
            Some(probes::http_probe(
                path,
                port,
                check.initial_delay_seconds,
                check.period_seconds,
            ))
        }
        "grpc" => Some(probes::grpc_probe(
            port,
            check.initial_delay_seconds,
            check.period_seconds,
        )),
        _ => None,
    }
}

/// Compose the app Deployment from the spec, the composed env and the
/// wait-for init containers.
pub fn build_app_deployment(
    dse: &DevStagingEnvironment,
    env: Vec<EnvVar>,
    init_containers: Vec<Container>,
    hash: &str,
) -> Deployment {
    let name = dse.metadata.name.clone().unwrap_or_default();
    let namespace = dse.metadata.namespace.clone().unwrap_or_default();
    let labels = app_labels(&name);
    let spec = &dse.spec;

    let container = Container {
        name: name.clone(),
        image: Some(spec.deployment.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: spec.deployment.port,
            ..Default::default()
        }]),
        env: (!env.is_empty()).then_some(env),
        resources: resource_requirements(spec),
        liveness_probe: app_probe(spec),
        readiness_probe: app_probe(spec),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            annotations: Some(hash_annotations(hash)),
            owner_references: Some(vec![owner_reference(dse)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.deployment.replicas),
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
                    init_containers: (!init_containers.is_empty()).then_some(init_containers),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Compose the app Service
pub fn build_app_service(dse: &DevStagingEnvironment, hash: &str) -> Service {
    let name = dse.metadata.name.clone().unwrap_or_default();
    let namespace = dse.metadata.namespace.clone().unwrap_or_default();
    let spec = &dse.spec;
    let target_port = spec.service.target_port.unwrap_or(spec.deployment.port);

    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(app_labels(&name)),
            annotations: Some(hash_annotations(hash)),
            owner_references: Some(vec![owner_reference(dse)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(
                spec.service
                    .kind
                    .clone()
                    .unwrap_or_else(|| "ClusterIP".to_string()),
            ),
            selector: Some(app_labels(&name)),
            ports: Some(vec![ServicePort {
                port: spec.service.port,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Compose the app Ingress. Only the spec-hash annotation is applied by the
/// operator's field manager, so annotations owned by other controllers (for
/// example cert-manager) survive the server-side apply untouched.
pub fn build_ingress(dse: &DevStagingEnvironment, ingress: &AppIngress, hash: &str) -> Ingress {
    let name = dse.metadata.name.clone().unwrap_or_default();
    let namespace = dse.metadata.namespace.clone().unwrap_or_default();

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(app_labels(&name)),
            annotations: Some(hash_annotations(hash)),
            owner_references: Some(vec![owner_reference(dse)]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(
                ingress
                    .ingress_class
                    .clone()
                    .unwrap_or_else(|| "nginx".to_string()),
            ),
            rules: Some(vec![IngressRule {
                host: Some(ingress.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(ingress.path.clone()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(dse.spec.service.port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::lookup;
    use crate::dse::models::{AppDeployment, AppEnvVar, AppService, HealthCheck};
    use kube::core::ObjectMeta as KubeObjectMeta;

    fn resolved_postgres() -> ResolvedDependency {
        let kind = lookup("postgres").unwrap();
        ResolvedDependency {
            dep_type: "postgres".to_string(),
            image: kind.image.clone(),
            port: kind.port,
            env_var_name: kind.env_var_name.clone(),
            kind,
            credentials: Credentials {
                user: "u".into(),
                password: "p".into(),
                database: "d".into(),
            },
        }
    }

    fn test_dse(spec: DevStagingEnvironmentSpec) -> DevStagingEnvironment {
        let mut dse = DevStagingEnvironment::new("demo", spec);
        dse.metadata = KubeObjectMeta {
            name: Some("demo".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("uid-1".to_string()),
            ..Default::default()
        };
        dse
    }

    fn minimal_spec() -> DevStagingEnvironmentSpec {
        DevStagingEnvironmentSpec {
            deployment: AppDeployment {
                image: "nginx:1".to_string(),
                port: 80,
                replicas: 1,
                env: vec![],
                resources: None,
                health_check: None,
            },
            service: AppService {
                port: 80,
                target_port: None,
                kind: None,
            },
            ingress: None,
            dependencies: vec![],
        }
    }

    #[test]
    fn test_compose_app_env_dependency_before_user() {
        let user_env = vec![
            AppEnvVar {
                name: "LOG_LEVEL".into(),
                value: "debug".into(),
            },
            AppEnvVar {
                name: "DATABASE_URL".into(),
                value: "postgres://override".into(),
            },
        ];
        let env = compose_app_env("demo", &[resolved_postgres()], &user_env);

        assert_eq!(env[0].name, "DATABASE_URL");
        assert_eq!(
            env[0].value.as_deref(),
            Some("postgres://u:p@demo-postgres:5432/d?sslmode=disable")
        );
        // User-supplied entry comes later, so Kubernetes lets it win
        assert_eq!(env[2].name, "DATABASE_URL");
        assert_eq!(env[2].value.as_deref(), Some("postgres://override"));
    }

    #[test]
    fn test_wait_for_init_containers() {
        let containers = wait_for_init_containers("demo", &[resolved_postgres()]);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "wait-for-postgres");
        let script = &containers[0].command.as_ref().unwrap()[2];
        assert!(script.contains("nc -z demo-postgres 5432"));
        assert!(script.contains("sleep 2"));
    }

    #[test]
    fn test_build_app_deployment_defaults_to_http_probe() {
        let dse = test_dse(minimal_spec());
        let deployment = build_app_deployment(&dse, vec![], vec![], "abc");
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let probe = container.liveness_probe.as_ref().unwrap();
        let http = probe.http_get.as_ref().unwrap();
        assert_eq!(http.path.as_deref(), Some("/"));
        assert_eq!(http.port, IntOrString::Int(80));
    }

    #[test]
    fn test_build_app_deployment_probe_none() {
        let mut spec = minimal_spec();
        spec.deployment.health_check = Some(HealthCheck {
            kind: "none".to_string(),
            ..Default::default()
        });
        let dse = test_dse(spec);
        let deployment = build_app_deployment(&dse, vec![], vec![], "abc");
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert!(container.liveness_probe.is_none());
        assert!(container.readiness_probe.is_none());
    }

    #[test]
    fn test_build_app_deployment_grpc_probe() {
        let mut spec = minimal_spec();
        spec.deployment.health_check = Some(HealthCheck {
            kind: "grpc".to_string(),
            port: 9090,
            ..Default::default()
        });
        let dse = test_dse(spec);
        let deployment = build_app_deployment(&dse, vec![], vec![], "abc");
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(
            container
                .readiness_probe
                .as_ref()
                .unwrap()
                .grpc
                .as_ref()
                .unwrap()
                .port,
            9090
        );
    }

    #[test]
    fn test_build_app_service_target_port_defaults() {
        let dse = test_dse(minimal_spec());
        let service = build_app_service(&dse, "abc");
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(80)));
    }

    #[test]
    fn test_labels_carry_required_set() {
        let dse = test_dse(minimal_spec());
        let deployment = build_app_deployment(&dse, vec![], vec![], "abc");
        let labels = deployment.metadata.labels.unwrap();
        assert_eq!(labels.get("app.kubernetes.io/name").unwrap(), "demo");
        assert_eq!(labels.get("app.kubernetes.io/instance").unwrap(), "demo");
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by").unwrap(),
            "devstagingenvironment-operator"
        );
    }

    #[test]
    fn test_spec_hash_tracks_credentials() {
        let spec = minimal_spec();
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("postgres".to_string(), "f1".to_string());
        let a = compute_spec_hash(&spec, &fingerprints).unwrap();

        fingerprints.insert("postgres".to_string(), "f2".to_string());
        let b = compute_spec_hash(&spec, &fingerprints).unwrap();
        assert_ne!(a, b);

        fingerprints.insert("postgres".to_string(), "f1".to_string());
        let c = compute_spec_hash(&spec, &fingerprints).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_resolve_image_version_override() {
        let kind = lookup("postgres").unwrap();
        assert_eq!(resolve_image(&kind, None), "postgres:15");
        assert_eq!(resolve_image(&kind, Some("16")), "postgres:16");
    }
}
