use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

/// Top-level configuration, loaded from `kindling.toml` plus `KINDLING_*`
/// environment overrides.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub dashboard: DashboardSettings,
    #[serde(default)]
    pub operator: OperatorSettings,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub expose: ExposeSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterSettings {
    /// Local cluster name (default: "dev")
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Ingress controller deployed in the cluster (default: "ingress-nginx")
    #[serde(default = "default_ingress_controller")]
    pub ingress_controller: String,

    /// In-cluster image registry host:port (default: "registry:5000")
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Cache repository used by Kaniko builds (default: "<registry>/cache")
    #[serde(default = "default_cache_repo")]
    pub cache_repo: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    #[serde(default = "default_dashboard_host")]
    pub host: String,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OperatorSettings {
    /// Requeue interval in seconds after a successful reconcile (default: 300)
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,

    /// Requeue interval in seconds after a transient error (default: 15)
    #[serde(default = "default_error_requeue_interval")]
    pub error_requeue_interval_secs: u64,

    /// Image used for the build-agent sidecar container
    #[serde(default = "default_kindling_image")]
    pub kindling_image: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildSettings {
    /// Timeout in seconds for a single image build (default: 300,
    /// compiled languages generally want 900)
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    /// Sweep interval in seconds for the build-agent loop (default: 1)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Debounce window in milliseconds for the file watcher (default: 500)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Timeout in seconds for deployment rollouts (default: 90)
    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExposeSettings {
    /// Command template used to start a tunnel. `{port}` is substituted with
    /// the local ingress port. Empty disables /api/expose.
    #[serde(default)]
    pub tunnel_command: String,
}

fn default_cluster_name() -> String {
    "dev".to_string()
}

fn default_ingress_controller() -> String {
    "ingress-nginx".to_string()
}

fn default_registry() -> String {
    "registry:5000".to_string()
}

fn default_cache_repo() -> String {
    "registry:5000/cache".to_string()
}

fn default_dashboard_host() -> String {
    "127.0.0.1".to_string()
}

fn default_dashboard_port() -> u16 {
    8440
}

fn default_requeue_interval() -> u64 {
    300
}

fn default_error_requeue_interval() -> u64 {
    15
}

fn default_kindling_image() -> String {
    "registry:5000/kindling:latest".to_string()
}

fn default_build_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    1
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_rollout_timeout() -> u64 {
    90
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            ingress_controller: default_ingress_controller(),
            registry: default_registry(),
            cache_repo: default_cache_repo(),
        }
    }
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            host: default_dashboard_host(),
            port: default_dashboard_port(),
        }
    }
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            requeue_interval_secs: default_requeue_interval(),
            error_requeue_interval_secs: default_error_requeue_interval(),
            kindling_image: default_kindling_image(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_build_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            rollout_timeout_secs: default_rollout_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from `kindling.toml` (optional) with `KINDLING_*`
    /// environment variable overrides, then substitute `${VAR}` /
    /// `${VAR:-default}` references in string values.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(config::File::with_name("kindling").required(false))
            .add_source(
                config::Environment::with_prefix("KINDLING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.substitute_env_vars();
        Ok(settings)
    }

    fn substitute_env_vars(&mut self) {
        self.cluster.name = Self::substitute_env_vars_in_string(&self.cluster.name);
        self.cluster.registry = Self::substitute_env_vars_in_string(&self.cluster.registry);
        self.cluster.cache_repo = Self::substitute_env_vars_in_string(&self.cluster.cache_repo);
        self.operator.kindling_image =
            Self::substitute_env_vars_in_string(&self.operator.kindling_image);
        self.expose.tunnel_command =
            Self::substitute_env_vars_in_string(&self.expose.tunnel_command);
    }

    /// Substitute `${VAR}` and `${VAR:-default}` references in a string
    fn substitute_env_vars_in_string(value: &str) -> String {
        let mut result = value.to_string();

        while let Some(start) = result.find("${") {
            let Some(end) = result[start..].find('}') else {
                break;
            };
            let end = start + end;
            let var_expr = &result[start + 2..end];

            let (var_name, default) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = env::var(var_name)
                .ok()
                .or_else(|| default.map(|d| d.to_string()))
                .unwrap_or_default();

            result.replace_range(start..=end, &replacement);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("KINDLING_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${KINDLING_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("KINDLING_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("KINDLING_MISSING_VAR");
        let result = Settings::substitute_env_vars_in_string("${KINDLING_MISSING_VAR:-fallback}");
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("registry:5000");
        assert_eq!(result, "registry:5000");
    }

    #[test]
    fn test_defaults() {
        let cluster = ClusterSettings::default();
        assert_eq!(cluster.name, "dev");
        assert_eq!(cluster.ingress_controller, "ingress-nginx");
        assert_eq!(cluster.registry, "registry:5000");
        assert_eq!(cluster.cache_repo, "registry:5000/cache");

        let sync = SyncSettings::default();
        assert_eq!(sync.debounce_ms, 500);
        assert_eq!(sync.rollout_timeout_secs, 90);
    }
}
