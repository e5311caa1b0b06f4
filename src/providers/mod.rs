mod github;
mod gitlab;

pub use github::GithubProvider;
pub use gitlab::GitlabProvider;

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, RwLock};

/// Name of the provider used when a CIRunnerPool does not specify one
pub const DEFAULT_PROVIDER: &str = "github";

/// Human-facing strings a CLI or prompt assembly needs for a provider
#[derive(Debug, Clone)]
pub struct CliLabels {
    /// e.g. "GitHub Actions"
    pub platform: String,
    /// CRD plural the provider's pools live under
    pub crd_plural: String,
    /// Component label attached to runner pods
    pub runner_component: String,
}

/// Inputs to runner env-var and naming composition, extracted from the pool
/// spec with defaults already resolved.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub username: String,
    pub repository: String,
    pub platform_url: String,
    pub token_secret_name: String,
    pub token_secret_key: String,
    /// Final label list: `self-hosted`, the sanitised username, then any
    /// extra labels from the spec
    pub labels: Vec<String>,
    pub runner_group: Option<String>,
    pub work_dir: String,
    pub cr_name: String,
}

/// One env var for the runner container: either a literal value or a
/// reference into the token Secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerEnvVar {
    pub name: String,
    pub value: Option<String>,
    /// `(secret name, key)` when the value comes from a Secret
    pub secret_ref: Option<(String, String)>,
}

impl RunnerEnvVar {
    pub fn literal(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value.into()),
            secret_ref: None,
        }
    }

    pub fn from_secret(name: &str, secret: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            secret_ref: Some((secret.to_string(), key.to_string())),
        }
    }
}

/// Per-platform runner behavior
pub trait RunnerAdapter: Send + Sync {
    fn default_image(&self) -> &str;
    fn default_token_key(&self) -> &str;
    fn default_work_dir(&self) -> &str;

    /// API base URL used for the PAT → registration-token exchange
    fn api_base_url(&self, platform_url: &str) -> String;

    /// Ordered env vars for the runner container
    fn runner_env_vars(&self, config: &RunnerConfig) -> Vec<RunnerEnvVar>;

    /// Standard Kubernetes labels for the runner pods
    fn runner_labels(&self, username: &str, cr_name: &str) -> BTreeMap<String, String>;

    /// Bash text that registers the runner, installs a SIGTERM
    /// de-registration trap, and execs the long-running runner process
    fn startup_script(&self) -> &str;

    fn deployment_name(&self, username: &str) -> String {
        format!("{}-runner", sanitize(username))
    }

    fn service_account_name(&self, username: &str) -> String {
        self.deployment_name(username)
    }

    fn cluster_role_name(&self, username: &str) -> String {
        self.deployment_name(username)
    }

    fn cluster_role_binding_name(&self, username: &str) -> String {
        self.deployment_name(username)
    }
}

/// Per-platform workflow generation surface, consumed by external front-ends
pub trait WorkflowAdapter: Send + Sync {
    /// System prompt for workflow generation on the given host architecture
    fn system_prompt(&self, host_arch: &str) -> String;

    /// Static context describing the build/deploy protocol
    fn prompt_context(&self) -> String;

    /// `(file name, yaml)` example workflows
    fn example_workflows(&self) -> Vec<(String, String)>;

    /// Where generated workflows are written, relative to the repo root
    fn default_output_path(&self) -> &str;

    /// Remove the platform's template expressions from generated text
    fn strip_template_expressions(&self, text: &str) -> String;
}

/// A CI platform plug-in
pub trait CiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;
    fn cli_labels(&self) -> CliLabels;
    fn runner(&self) -> &dyn RunnerAdapter;
    fn workflow(&self) -> &dyn WorkflowAdapter;
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn CiProvider>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn CiProvider>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn CiProvider>> = HashMap::new();
        let github: Arc<dyn CiProvider> = Arc::new(GithubProvider::new());
        let gitlab: Arc<dyn CiProvider> = Arc::new(GitlabProvider::new());
        map.insert(github.name().to_string(), github);
        map.insert(gitlab.name().to_string(), gitlab);
        RwLock::new(map)
    })
}

/// Register (or replace) a provider. Registration is idempotent-overwriting
/// so tests can swap in fakes.
pub fn register(provider: Arc<dyn CiProvider>) {
    registry()
        .write()
        .unwrap()
        .insert(provider.name().to_string(), provider);
}

/// Look up a provider by name; an empty name selects the default
pub fn get(name: &str) -> Result<Arc<dyn CiProvider>> {
    let name = if name.is_empty() {
        DEFAULT_PROVIDER
    } else {
        name
    };
    let map = registry().read().unwrap();
    match map.get(name) {
        Some(provider) => Ok(provider.clone()),
        None => {
            let mut known: Vec<&str> = map.keys().map(String::as_str).collect();
            known.sort();
            bail!(
                "unknown CI provider '{}' (registered: {})",
                name,
                known.join(", ")
            )
        }
    }
}

/// Produce the DNS-safe form of a username.
///
/// Lowercase, every run of characters outside [a-z0-9] collapses to a single
/// `-`, leading/trailing `-` stripped, `"runner"` on empty. This is the
/// single source of DNS-safe identity shared by the CLI, the reconciler and
/// the sidecar.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "runner".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize("Alice.Dev"), "alice-dev");
        assert_eq!(sanitize("A.B@C"), "a-b-c");
    }

    #[test]
    fn test_sanitize_strips_edge_dashes() {
        assert_eq!(sanitize("---x---"), "x");
        assert_eq!(sanitize("..x.."), "x");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize(""), "runner");
        assert_eq!(sanitize("..."), "runner");
    }

    #[test]
    fn test_sanitize_collapses_runs() {
        assert_eq!(sanitize("a..__b"), "a-b");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for raw in ["Alice.Dev", "---x---", "", "a..__b", "ALL_CAPS", "ok"] {
            let once = sanitize(raw);
            assert_eq!(sanitize(&once), once, "sanitize not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_get_default_provider() {
        let provider = get("").unwrap();
        assert_eq!(provider.name(), "github");
    }

    #[test]
    fn test_get_unknown_lists_registered() {
        let err = match get("circleci") {
            Err(e) => e.to_string(),
            Ok(_) => panic!("expected error for unknown provider"),
        };
        assert!(err.contains("github"));
        assert!(err.contains("gitlab"));
    }

    #[test]
    fn test_workflow_adapters_cover_contract() {
        for name in ["github", "gitlab"] {
            let provider = get(name).unwrap();
            let workflow = provider.workflow();
            let prompt = workflow.system_prompt("arm64");
            assert!(prompt.contains("arm64"));
            assert!(workflow.prompt_context().contains("/builds"));
            assert!(!workflow.example_workflows().is_empty());
            assert!(!workflow.default_output_path().is_empty());
        }
    }

    #[test]
    fn test_naming_helpers_agree() {
        let provider = get("github").unwrap();
        let runner = provider.runner();
        assert_eq!(runner.deployment_name("Alice.Dev"), "alice-dev-runner");
        assert_eq!(
            runner.service_account_name("Alice.Dev"),
            runner.deployment_name("Alice.Dev")
        );
        assert_eq!(
            runner.cluster_role_name("Alice.Dev"),
            runner.cluster_role_binding_name("Alice.Dev")
        );
    }
}
