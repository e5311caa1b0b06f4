use super::models::StatusCondition;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::networking::v1::Ingress;

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_DEPLOYMENT_READY: &str = "DeploymentReady";
pub const CONDITION_DEPENDENCIES_READY: &str = "DependenciesReady";
pub const CONDITION_INGRESS_READY: &str = "IngressReady";

/// `DeploymentReady`: true iff availableReplicas matches the spec
pub fn deployment_condition(observed: Option<&Deployment>, want_replicas: i32) -> StatusCondition {
    let available = observed
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    if available == want_replicas {
        StatusCondition::new(
            CONDITION_DEPLOYMENT_READY,
            true,
            "ReplicasAvailable",
            format!("{}/{} replicas available", available, want_replicas),
        )
    } else {
        StatusCondition::new(
            CONDITION_DEPLOYMENT_READY,
            false,
            "ReplicasUnavailable",
            format!("{}/{} replicas available", available, want_replicas),
        )
    }
}

/// `DependenciesReady`: true iff every recognised dependency workload is
/// ready and no declared dependency was unrecognised.
pub fn dependencies_condition(
    states: &[(String, bool)],
    invalid: &[String],
) -> StatusCondition {
    if !invalid.is_empty() {
        return StatusCondition::new(
            CONDITION_DEPENDENCIES_READY,
            false,
            "DependencyInvalid",
            format!("unknown dependency types: {}", invalid.join(", ")),
        );
    }
    let pending: Vec<&str> = states
        .iter()
        .filter(|(_, ready)| !ready)
        .map(|(name, _)| name.as_str())
        .collect();
    if pending.is_empty() {
        StatusCondition::new(
            CONDITION_DEPENDENCIES_READY,
            true,
            "AllDependenciesReady",
            format!("{} dependency workload(s) ready", states.len()),
        )
    } else {
        StatusCondition::new(
            CONDITION_DEPENDENCIES_READY,
            false,
            "DependenciesPending",
            format!("waiting for: {}", pending.join(", ")),
        )
    }
}

/// `IngressReady`: true iff ingress is absent or carries a populated
/// load-balancer status.
pub fn ingress_condition(observed: Option<&Ingress>, wanted: bool) -> StatusCondition {
    if !wanted {
        return StatusCondition::new(
            CONDITION_INGRESS_READY,
            true,
            "IngressNotRequested",
            "no ingress declared",
        );
    }
    let populated = observed
        .and_then(|i| i.status.as_ref())
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|entries| !entries.is_empty())
        .unwrap_or(false);
    if populated {
        StatusCondition::new(
            CONDITION_INGRESS_READY,
            true,
            "IngressAdmitted",
            "ingress has load balancer status",
        )
    } else {
        StatusCondition::new(
            CONDITION_INGRESS_READY,
            false,
            "IngressPending",
            "waiting for ingress controller to admit the ingress",
        )
    }
}

/// `Ready`: conjunction of the component conditions
pub fn ready_condition(parts: &[&StatusCondition]) -> StatusCondition {
    let failing: Vec<&str> = parts
        .iter()
        .filter(|c| !c.is_true())
        .map(|c| c.kind.as_str())
        .collect();
    if failing.is_empty() {
        StatusCondition::new(CONDITION_READY, true, "AllComponentsReady", "environment is ready")
    } else {
        StatusCondition::new(
            CONDITION_READY,
            false,
            "ComponentsNotReady",
            format!("not ready: {}", failing.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn deployment_with_available(available: i32) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_deployment_condition() {
        let d = deployment_with_available(1);
        assert!(deployment_condition(Some(&d), 1).is_true());
        assert!(!deployment_condition(Some(&d), 2).is_true());
        assert!(!deployment_condition(None, 1).is_true());
    }

    #[test]
    fn test_dependencies_condition_invalid_wins() {
        let states = vec![("demo-postgres".to_string(), true)];
        let condition = dependencies_condition(&states, &["exoticdb".to_string()]);
        assert!(!condition.is_true());
        assert_eq!(condition.reason, "DependencyInvalid");
    }

    #[test]
    fn test_dependencies_condition_pending() {
        let states = vec![
            ("demo-postgres".to_string(), true),
            ("demo-redis".to_string(), false),
        ];
        let condition = dependencies_condition(&states, &[]);
        assert!(!condition.is_true());
        assert!(condition.message.contains("demo-redis"));
    }

    #[test]
    fn test_ingress_condition_absent_is_ready() {
        assert!(ingress_condition(None, false).is_true());
        assert!(!ingress_condition(None, true).is_true());
    }

    #[test]
    fn test_ready_is_conjunction() {
        let good = StatusCondition::new("DeploymentReady", true, "Ok", "");
        let bad = StatusCondition::new("IngressReady", false, "IngressPending", "");
        assert!(ready_condition(&[&good]).is_true());
        let ready = ready_condition(&[&good, &bad]);
        assert!(!ready.is_true());
        assert!(ready.message.contains("IngressReady"));
    }
}
