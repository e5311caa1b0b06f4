use super::{Credentials, CredentialField, DependencyKind, ReadinessSpec, WorkloadKind};
use crate::k8s::probes;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// A dependency workload, shaped per the registry entry
#[derive(Debug, Clone)]
pub enum DependencyWorkload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
}

fn credential_value(field: CredentialField, creds: &Credentials) -> String {
    match field {
        CredentialField::User => creds.user.clone(),
        CredentialField::Password => creds.password.clone(),
        CredentialField::Database => creds.database.clone(),
    }
}

fn readiness_probe(spec: &ReadinessSpec, port: i32, creds: &Credentials) -> Probe {
    match spec {
        ReadinessSpec::Exec {
            command,
            delay,
            period,
        } => {
            let expanded = command
                .iter()
                .map(|part| part.replace("{user}", &creds.user))
                .collect();
            probes::exec_probe(expanded, *delay, *period)
        }
        ReadinessSpec::Tcp { delay, period } => probes::tcp_probe(port, *delay, *period),
    }
}

fn dependency_container(
    name: &str,
    kind: &DependencyKind,
    image: String,
    port: i32,
    creds: &Credentials,
) -> Container {
    let mut env: Vec<EnvVar> = kind
        .credential_env
        .iter()
        .map(|(var, field)| EnvVar {
            name: var.clone(),
            value: Some(credential_value(*field, creds)),
            ..Default::default()
        })
        .collect();
    env.extend(kind.extra_env.iter().map(|(var, value)| EnvVar {
        name: var.clone(),
        value: Some(value.clone()),
        ..Default::default()
    }));

    let volume_mounts = kind.data_path.as_ref().map(|path| {
        vec![VolumeMount {
            name: "data".to_string(),
            mount_path: path.clone(),
            ..Default::default()
        }]
    });

    Container {
        name: name.to_string(),
        image: Some(image),
        args: (!kind.args.is_empty()).then(|| kind.args.clone()),
        ports: Some(vec![ContainerPort {
            container_port: port,
            ..Default::default()
        }]),
        env: (!env.is_empty()).then_some(env),
        readiness_probe: Some(readiness_probe(&kind.readiness, port, creds)),
        volume_mounts,
        ..Default::default()
    }
}

fn pod_template(labels: &BTreeMap<String, String>, container: Container) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            ..Default::default()
        }),
    }
}

fn data_claim() -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity("1Gi".to_string()));
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Compose the dependency workload (Deployment or StatefulSet per the
/// registry entry) with a stable name, the registry readiness probe and the
/// materialised credentials in env.
#[allow(clippy::too_many_arguments)]
pub fn build_dependency_workload(
    name: &str,
    namespace: &str,
    dep_type: &str,
    kind: &DependencyKind,
    image: String,
    port: i32,
    creds: &Credentials,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    owner_ref: &OwnerReference,
) -> DependencyWorkload {
    let container = dependency_container(dep_type, kind, image, port, creds);
    let metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        annotations: Some(annotations),
        owner_references: Some(vec![owner_ref.clone()]),
        ..Default::default()
    };
    let selector = LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    };

    match kind.workload_kind {
        WorkloadKind::Deployment => DependencyWorkload::Deployment(Deployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector,
                template: pod_template(&labels, container),
                ..Default::default()
            }),
            ..Default::default()
        }),
        WorkloadKind::StatefulSet => DependencyWorkload::StatefulSet(StatefulSet {
            metadata,
            spec: Some(StatefulSetSpec {
                replicas: Some(1),
                service_name: name.to_string(),
                selector,
                template: pod_template(&labels, container),
                volume_claim_templates: kind.persistent.then(|| vec![data_claim()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Compose the ClusterIP Service exposing a dependency on its registry port
pub fn build_dependency_service(
    name: &str,
    namespace: &str,
    port: i32,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    owner_ref: &OwnerReference,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
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
    use crate::k8s::naming;

    fn test_owner_ref() -> OwnerReference {
        OwnerReference {
            api_version: "apps.example.com/v1alpha1".to_string(),
            kind: "DevStagingEnvironment".to_string(),
            name: "demo".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_postgres_workload_shape() {
        let kind = lookup("postgres").unwrap();
        let creds = Credentials {
            user: "u".into(),
            password: "p".into(),
            database: "d".into(),
        };
        let labels = naming::dse_labels("demo");
        let workload = build_dependency_workload(
            "demo-postgres",
            "default",
            "postgres",
            &kind,
            kind.image.clone(),
            kind.port,
            &creds,
            labels,
            BTreeMap::new(),
            &test_owner_ref(),
        );

        let DependencyWorkload::Deployment(deployment) = workload else {
            panic!("postgres should be a Deployment");
        };
        assert_eq!(deployment.metadata.name.as_deref(), Some("demo-postgres"));
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("postgres:15"));

        let probe = container.readiness_probe.as_ref().unwrap();
        let command = probe.exec.as_ref().unwrap().command.as_ref().unwrap();
        assert_eq!(command, &vec!["pg_isready".to_string(), "-U".into(), "u".into()]);

        let env = container.env.as_ref().unwrap();
        let user = env.iter().find(|e| e.name == "POSTGRES_USER").unwrap();
        assert_eq!(user.value.as_deref(), Some("u"));
    }

    #[test]
    fn test_statefulset_kind_gets_claim() {
        let kind = lookup("mongodb").unwrap();
        let workload = build_dependency_workload(
            "demo-mongodb",
            "default",
            "mongodb",
            &kind,
            kind.image.clone(),
            kind.port,
            &Credentials::default(),
            naming::dse_labels("demo"),
            BTreeMap::new(),
            &test_owner_ref(),
        );
        let DependencyWorkload::StatefulSet(sts) = workload else {
            panic!("mongodb should be a StatefulSet");
        };
        let spec = sts.spec.unwrap();
        assert_eq!(spec.service_name, "demo-mongodb");
        assert!(spec.volume_claim_templates.is_some());
    }

    #[test]
    fn test_dependency_service() {
        let service = build_dependency_service(
            "demo-postgres",
            "default",
            5432,
            naming::dse_labels("demo"),
            BTreeMap::new(),
            &test_owner_ref(),
        );
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.ports.unwrap()[0].port, 5432);
    }
}
