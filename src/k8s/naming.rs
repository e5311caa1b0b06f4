use anyhow::{bail, Result};
use std::collections::BTreeMap;

// Kubernetes label constants shared by everything the operator emits
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_DSE: &str = "devstagingenvironment-operator";

/// Authoritative DNS name of a dependency workload inside the namespace
pub fn dependency_name(owner: &str, dep_type: &str) -> String {
    format!("{}-{}", owner, dep_type)
}

/// Name of the Secret holding materialised credentials for a dependency
pub fn credentials_secret_name(owner: &str, dep_type: &str) -> String {
    format!("{}-{}-creds", owner, dep_type)
}

/// Name of the wait-for init container for a dependency
pub fn wait_init_container_name(dep_type: &str) -> String {
    format!("wait-for-{}", dep_type)
}

/// Label set carried by every resource a DevStagingEnvironment owns
pub fn dse_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    labels.insert(LABEL_INSTANCE.to_string(), name.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_DSE.to_string());
    labels
}

/// Recover the Deployment name from a pod name.
///
/// Pod names have the shape `<deployment>-<replicaset hash>-<pod hash>`, so
/// anything with fewer than three hyphen-separated segments cannot have come
/// from a Deployment.
pub fn deployment_from_pod_name(pod_name: &str) -> Result<String> {
    let segments: Vec<&str> = pod_name.split('-').collect();
    if segments.len() < 3 {
        bail!(
            "pod name '{}' does not look like a Deployment-managed pod",
            pod_name
        );
    }
    Ok(segments[..segments.len() - 2].join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_name() {
        assert_eq!(dependency_name("demo", "postgres"), "demo-postgres");
        assert_eq!(
            credentials_secret_name("demo", "postgres"),
            "demo-postgres-creds"
        );
    }

    #[test]
    fn test_dse_labels() {
        let labels = dse_labels("demo");
        assert_eq!(labels.get(LABEL_NAME).unwrap(), "demo");
        assert_eq!(labels.get(LABEL_INSTANCE).unwrap(), "demo");
        assert_eq!(
            labels.get(LABEL_MANAGED_BY).unwrap(),
            "devstagingenvironment-operator"
        );
    }

    #[test]
    fn test_deployment_from_pod_name() {
        assert_eq!(
            deployment_from_pod_name("a-b-c-abc12-xyz34").unwrap(),
            "a-b-c"
        );
        assert_eq!(
            deployment_from_pod_name("demo-6d4cf56db6-9kxp4").unwrap(),
            "demo"
        );
    }

    #[test]
    fn test_deployment_from_pod_name_too_short() {
        assert!(deployment_from_pod_name("demo-9kxp4").is_err());
        assert!(deployment_from_pod_name("demo").is_err());
    }
}
