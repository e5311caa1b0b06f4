mod credentials;
mod registry;
mod workload;

pub use credentials::{materialise_credentials, Credentials};
pub use registry::{
    known_kinds, lookup, managed_env_var_names, register, CredentialField, DependencyKind,
    ReadinessSpec, WorkloadKind,
};
pub use workload::{build_dependency_service, build_dependency_workload, DependencyWorkload};

/// Expand a connection-URL template with the live Service DNS name, port and
/// materialised credentials.
///
/// Recognised placeholders: `{user}`, `{password}`, `{host}`, `{port}`,
/// `{database}`.
pub fn expand_url_template(
    template: &str,
    host: &str,
    port: i32,
    creds: &Credentials,
) -> String {
    template
        .replace("{user}", &creds.user)
        .replace("{password}", &creds.password)
        .replace("{database}", &creds.database)
        .replace("{host}", host)
        .replace("{port}", &port.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_url_template_postgres() {
        let creds = Credentials {
            user: "u1".into(),
            password: "p1".into(),
            database: "d1".into(),
        };
        let url = expand_url_template(
            "postgres://{user}:{password}@{host}:{port}/{database}?sslmode=disable",
            "demo-postgres",
            5432,
            &creds,
        );
        assert_eq!(url, "postgres://u1:p1@demo-postgres:5432/d1?sslmode=disable");
    }

    #[test]
    fn test_expand_url_template_without_credentials() {
        let creds = Credentials::default();
        let url = expand_url_template("redis://{host}:{port}", "demo-redis", 6379, &creds);
        assert_eq!(url, "redis://demo-redis:6379");
    }
}
