use crate::dse::DevStagingEnvironment;
use crate::runner::CIRunnerPool;

use anyhow::Result;
use kube::CustomResourceExt;

/// Render both CRD manifests as a multi-document YAML stream, ready for
/// `kubectl apply -f -`.
pub fn manifests() -> Result<String> {
    let dse = serde_yaml::to_string(&DevStagingEnvironment::crd())?;
    let pool = serde_yaml::to_string(&CIRunnerPool::crd())?;
    Ok(format!("{}---\n{}", dse, pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifests_contain_both_crds() {
        let yaml = manifests().unwrap();
        assert!(yaml.contains("devstagingenvironments.apps.example.com"));
        assert!(yaml.contains("cirunnerpools.apps.example.com"));
        assert!(yaml.contains("kind: CustomResourceDefinition"));
    }

    #[test]
    fn test_dse_crd_printer_columns() {
        let crd = DevStagingEnvironment::crd();
        let version = &crd.spec.versions[0];
        let columns = version.additional_printer_columns.as_ref().unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Image"));
        assert!(names.contains(&"Port"));
        assert!(names.contains(&"Ready"));
    }
}
