use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Which workload shape a dependency runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

/// Readiness probe shape for a dependency container.
///
/// Exec commands may reference `{user}` which is expanded with the
/// materialised credential before the probe is built.
#[derive(Debug, Clone)]
pub enum ReadinessSpec {
    Exec {
        command: Vec<String>,
        delay: i32,
        period: i32,
    },
    Tcp {
        delay: i32,
        period: i32,
    },
}

/// Credential field injected into the dependency container's environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    User,
    Password,
    Database,
}

/// Static description of one dependency kind: how to run it and how apps
/// connect to it.
#[derive(Debug, Clone)]
pub struct DependencyKind {
    /// Default container image (overridable per-dependency via `version`)
    pub image: String,
    /// Port the dependency listens on
    pub port: i32,
    /// Env var name injected into the app container
    pub env_var_name: String,
    /// Connection URL template; see [`super::expand_url_template`]
    pub url_template: String,
    /// Credential fields mapped onto container env var names
    pub credential_env: Vec<(String, CredentialField)>,
    /// Fixed env vars the container needs regardless of credentials
    pub extra_env: Vec<(String, String)>,
    /// Container args, when the image needs them (e.g. minio `server /data`)
    pub args: Vec<String>,
    pub readiness: ReadinessSpec,
    pub workload_kind: WorkloadKind,
    /// Whether the workload gets a persistent volume claim
    pub persistent: bool,
    /// Where the persistent volume is mounted inside the container
    pub data_path: Option<String>,
    /// Whether credentials are materialised for this kind
    pub needs_credentials: bool,
}

fn exec_probe(parts: &[&str], delay: i32, period: i32) -> ReadinessSpec {
    ReadinessSpec::Exec {
        command: parts.iter().map(|p| p.to_string()).collect(),
        delay,
        period,
    }
}

fn env(pairs: &[(&str, CredentialField)]) -> Vec<(String, CredentialField)> {
    pairs.iter().map(|(n, f)| (n.to_string(), *f)).collect()
}

fn strings(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

fn defaults() -> HashMap<String, Arc<DependencyKind>> {
    use CredentialField::{Database, Password, User};

    let mut map = HashMap::new();

    map.insert(
        "postgres".to_string(),
        Arc::new(DependencyKind {
            image: "postgres:15".into(),
            port: 5432,
            env_var_name: "DATABASE_URL".into(),
            url_template: "postgres://{user}:{password}@{host}:{port}/{database}?sslmode=disable"
                .into(),
            credential_env: env(&[
                ("POSTGRES_USER", User),
                ("POSTGRES_PASSWORD", Password),
                ("POSTGRES_DB", Database),
            ]),
            extra_env: vec![],
            args: vec![],
            readiness: exec_probe(&["pg_isready", "-U", "{user}"], 5, 10),
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: true,
        }),
    );

    map.insert(
        "mysql".to_string(),
        Arc::new(DependencyKind {
            image: "mysql:8".into(),
            port: 3306,
            env_var_name: "MYSQL_URL".into(),
            url_template: "mysql://{user}:{password}@{host}:{port}/{database}".into(),
            credential_env: env(&[
                ("MYSQL_USER", User),
                ("MYSQL_PASSWORD", Password),
                ("MYSQL_ROOT_PASSWORD", Password),
                ("MYSQL_DATABASE", Database),
            ]),
            extra_env: vec![],
            args: vec![],
            readiness: exec_probe(&["mysqladmin", "ping", "-h", "127.0.0.1"], 10, 10),
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: true,
        }),
    );

    map.insert(
        "redis".to_string(),
        Arc::new(DependencyKind {
            image: "redis:7".into(),
            port: 6379,
            env_var_name: "REDIS_URL".into(),
            url_template: "redis://{host}:{port}".into(),
            credential_env: vec![],
            extra_env: vec![],
            args: vec![],
            readiness: exec_probe(&["redis-cli", "ping"], 2, 5),
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: false,
        }),
    );

    map.insert(
        "mongodb".to_string(),
        Arc::new(DependencyKind {
            image: "mongo:7".into(),
            port: 27017,
            env_var_name: "MONGODB_URL".into(),
            url_template: "mongodb://{user}:{password}@{host}:{port}/{database}".into(),
            credential_env: env(&[
                ("MONGO_INITDB_ROOT_USERNAME", User),
                ("MONGO_INITDB_ROOT_PASSWORD", Password),
                ("MONGO_INITDB_DATABASE", Database),
            ]),
            extra_env: vec![],
            args: vec![],
            readiness: ReadinessSpec::Tcp {
                delay: 5,
                period: 10,
            },
            workload_kind: WorkloadKind::StatefulSet,
            persistent: true,
            data_path: Some("/data/db".into()),
            needs_credentials: true,
        }),
    );

    map.insert(
        "kafka".to_string(),
        Arc::new(DependencyKind {
            image: "bitnami/kafka:3.7".into(),
            port: 9092,
            env_var_name: "KAFKA_BROKERS".into(),
            url_template: "{host}:{port}".into(),
            credential_env: vec![],
            extra_env: strings(&[
                ("KAFKA_CFG_NODE_ID", "0"),
                ("KAFKA_CFG_PROCESS_ROLES", "controller,broker"),
                ("KAFKA_CFG_CONTROLLER_QUORUM_VOTERS", "0@localhost:9093"),
                (
                    "KAFKA_CFG_LISTENERS",
                    "PLAINTEXT://:9092,CONTROLLER://:9093",
                ),
                ("KAFKA_CFG_CONTROLLER_LISTENER_NAMES", "CONTROLLER"),
            ]),
            args: vec![],
            readiness: ReadinessSpec::Tcp {
                delay: 10,
                period: 10,
            },
            workload_kind: WorkloadKind::StatefulSet,
            persistent: true,
            data_path: Some("/bitnami/kafka".into()),
            needs_credentials: false,
        }),
    );

    map.insert(
        "rabbitmq".to_string(),
        Arc::new(DependencyKind {
            image: "rabbitmq:3".into(),
            port: 5672,
            env_var_name: "AMQP_URL".into(),
            url_template: "amqp://{user}:{password}@{host}:{port}".into(),
            credential_env: env(&[
                ("RABBITMQ_DEFAULT_USER", User),
                ("RABBITMQ_DEFAULT_PASS", Password),
            ]),
            extra_env: vec![],
            args: vec![],
            readiness: exec_probe(&["rabbitmq-diagnostics", "-q", "ping"], 10, 15),
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: true,
        }),
    );

    map.insert(
        "minio".to_string(),
        Arc::new(DependencyKind {
            image: "minio/minio:latest".into(),
            port: 9000,
            env_var_name: "S3_URL".into(),
            url_template: "http://{host}:{port}".into(),
            credential_env: env(&[("MINIO_ROOT_USER", User), ("MINIO_ROOT_PASSWORD", Password)]),
            extra_env: vec![],
            args: vec!["server".into(), "/data".into()],
            readiness: ReadinessSpec::Tcp {
                delay: 5,
                period: 10,
            },
            workload_kind: WorkloadKind::StatefulSet,
            persistent: true,
            data_path: Some("/data".into()),
            needs_credentials: true,
        }),
    );

    map.insert(
        "elasticsearch".to_string(),
        Arc::new(DependencyKind {
            image: "elasticsearch:8.13.4".into(),
            port: 9200,
            env_var_name: "ELASTICSEARCH_URL".into(),
            url_template: "http://{host}:{port}".into(),
            credential_env: vec![],
            extra_env: strings(&[
                ("discovery.type", "single-node"),
                ("xpack.security.enabled", "false"),
                ("ES_JAVA_OPTS", "-Xms512m -Xmx512m"),
            ]),
            args: vec![],
            readiness: ReadinessSpec::Tcp {
                delay: 20,
                period: 10,
            },
            workload_kind: WorkloadKind::StatefulSet,
            persistent: true,
            data_path: Some("/usr/share/elasticsearch/data".into()),
            needs_credentials: false,
        }),
    );

    map.insert(
        "memcached".to_string(),
        Arc::new(DependencyKind {
            image: "memcached:1.6".into(),
            port: 11211,
            env_var_name: "MEMCACHED_URL".into(),
            url_template: "{host}:{port}".into(),
            credential_env: vec![],
            extra_env: vec![],
            args: vec![],
            readiness: ReadinessSpec::Tcp {
                delay: 2,
                period: 5,
            },
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: false,
        }),
    );

    map.insert(
        "nats".to_string(),
        Arc::new(DependencyKind {
            image: "nats:2".into(),
            port: 4222,
            env_var_name: "NATS_URL".into(),
            url_template: "nats://{host}:{port}".into(),
            credential_env: vec![],
            extra_env: vec![],
            args: vec![],
            readiness: ReadinessSpec::Tcp {
                delay: 2,
                period: 5,
            },
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: false,
        }),
    );

    map
}

fn registry() -> &'static RwLock<HashMap<String, Arc<DependencyKind>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<DependencyKind>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(defaults()))
}

/// Look up a dependency kind by its `type` string
pub fn lookup(kind: &str) -> Option<Arc<DependencyKind>> {
    registry().read().unwrap().get(kind).cloned()
}

/// Register (or replace) a dependency kind. Used by tests to override
/// entries; registration is idempotent-overwriting.
pub fn register(name: &str, kind: DependencyKind) {
    registry()
        .write()
        .unwrap()
        .insert(name.to_string(), Arc::new(kind));
}

/// Sorted list of registered kind names, for error messages and the
/// env-var suppression list.
pub fn known_kinds() -> Vec<String> {
    let mut kinds: Vec<String> = registry().read().unwrap().keys().cloned().collect();
    kinds.sort();
    kinds
}

/// App env var names the dependency machinery owns (DATABASE_URL etc.);
/// source scanners must not flag these as unmanaged.
pub fn managed_env_var_names() -> Vec<String> {
    let mut names: Vec<String> = registry()
        .read()
        .unwrap()
        .values()
        .map(|kind| kind.env_var_name.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_postgres() {
        let kind = lookup("postgres").expect("postgres is registered");
        assert_eq!(kind.image, "postgres:15");
        assert_eq!(kind.port, 5432);
        assert_eq!(kind.env_var_name, "DATABASE_URL");
        assert!(kind.needs_credentials);
        assert_eq!(kind.workload_kind, WorkloadKind::Deployment);
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(lookup("exoticdb").is_none());
    }

    #[test]
    fn test_known_kinds_sorted() {
        let kinds = known_kinds();
        assert!(kinds.contains(&"postgres".to_string()));
        assert!(kinds.contains(&"redis".to_string()));
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }

    #[test]
    fn test_register_overwrites() {
        let custom = DependencyKind {
            image: "postgres:16".into(),
            port: 5432,
            env_var_name: "DATABASE_URL".into(),
            url_template: "postgres://{host}:{port}".into(),
            credential_env: vec![],
            extra_env: vec![],
            args: vec![],
            readiness: ReadinessSpec::Tcp {
                delay: 0,
                period: 0,
            },
            workload_kind: WorkloadKind::Deployment,
            persistent: false,
            data_path: None,
            needs_credentials: false,
        };
        register("postgres-custom", custom.clone());
        register("postgres-custom", custom);
        assert_eq!(
            lookup("postgres-custom").unwrap().image,
            "postgres:16"
        );
    }
}
