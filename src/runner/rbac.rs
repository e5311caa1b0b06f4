use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(api_groups.iter().map(|s| s.to_string()).collect()),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

const ALL_VERBS: &[&str] = &["get", "list", "watch", "create", "update", "patch", "delete"];

/// Permission set the build-agent sidecar needs: enough to run Kaniko pods,
/// apply manifests, and manage the developer's staging environments, and
/// nothing node- or RBAC-shaped.
pub fn sidecar_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            &[""],
            &["pods", "pods/log", "pods/exec", "services", "configmaps", "secrets"],
            ALL_VERBS,
        ),
        rule(&[""], &["events"], &["get", "list", "watch", "create"]),
        rule(&[""], &["namespaces", "nodes"], &["get", "list", "watch"]),
        rule(
            &["apps"],
            &["deployments", "statefulsets", "replicasets"],
            ALL_VERBS,
        ),
        rule(&["networking.k8s.io"], &["ingresses"], ALL_VERBS),
        rule(&["batch"], &["jobs"], ALL_VERBS),
        rule(
            &["apps.example.com"],
            &["devstagingenvironments", "cirunnerpools"],
            ALL_VERBS,
        ),
        rule(
            &["apps.example.com"],
            &["devstagingenvironments/status", "cirunnerpools/status"],
            &["get", "update", "patch"],
        ),
    ]
}

/// ServiceAccount for the runner pod, owned by the pool
pub fn build_service_account(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    owner_ref: &OwnerReference,
) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Cluster-scoped role for the sidecar. Not owner-referenced: cluster-scoped
/// objects cannot be owned by a namespaced CR, so the pool finalizer deletes
/// it instead.
pub fn build_cluster_role(name: &str, labels: BTreeMap<String, String>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        rules: Some(sidecar_rules()),
        ..Default::default()
    }
}

pub fn build_cluster_role_binding(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_rules_cover_core_duties() {
        let rules = sidecar_rules();
        let has = |group: &str, resource: &str| {
            rules.iter().any(|r| {
                r.api_groups
                    .as_ref()
                    .is_some_and(|g| g.iter().any(|x| x == group))
                    && r.resources
                        .as_ref()
                        .is_some_and(|res| res.iter().any(|x| x == resource))
            })
        };
        assert!(has("", "pods"));
        assert!(has("", "secrets"));
        assert!(has("apps", "deployments"));
        assert!(has("networking.k8s.io", "ingresses"));
        assert!(has("apps.example.com", "devstagingenvironments"));
    }

    #[test]
    fn test_binding_points_at_role_and_sa() {
        let binding = build_cluster_role_binding("alice-dev-runner", "default", BTreeMap::new());
        assert_eq!(binding.role_ref.name, "alice-dev-runner");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "alice-dev-runner");
        assert_eq!(subject.namespace.as_deref(), Some("default"));
    }
}
