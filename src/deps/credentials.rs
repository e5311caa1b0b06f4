use crate::error::Result;
use crate::k8s::hash::chained_hash;
use crate::k8s::naming;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::Client;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Materialised credentials for one dependency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Credentials {
    /// Short fingerprint folded into the spec hash, so credential changes
    /// roll the dependent workloads without leaking values into annotations.
    pub fn fingerprint(&self) -> String {
        chained_hash(&[
            self.user.as_bytes(),
            self.password.as_bytes(),
            self.database.as_bytes(),
        ])
    }
}

const CREDENTIAL_LEN: usize = 24;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn generate_value() -> String {
    let mut rng = rand::thread_rng();
    (0..CREDENTIAL_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

fn decode(data: &BTreeMap<String, k8s_openapi::ByteString>, key: &str) -> String {
    data.get(key)
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .unwrap_or_default()
}

fn credentials_from_secret(secret: &Secret) -> Credentials {
    let data = secret.data.clone().unwrap_or_default();
    Credentials {
        user: decode(&data, "user"),
        password: decode(&data, "password"),
        database: decode(&data, "database"),
    }
}

/// Materialise credentials for a dependency of `owner_name`.
///
/// Explicit credentials from the spec win. Otherwise an existing
/// `<name>-<type>-creds` Secret is adopted as-is (it may have been
/// pre-created by the developer), and only when neither exists are random
/// values generated and stored. The stored Secret is reused verbatim on
/// every later reconcile, so two reconciles never produce two Secrets.
pub async fn materialise_credentials(
    client: Client,
    namespace: &str,
    owner_name: &str,
    dep_type: &str,
    explicit: Option<Credentials>,
    owner_ref: &OwnerReference,
    labels: &BTreeMap<String, String>,
) -> Result<Credentials> {
    if let Some(creds) = explicit {
        return Ok(creds);
    }

    let secret_name = naming::credentials_secret_name(owner_name, dep_type);
    let secrets: Api<Secret> = Api::namespaced(client, namespace);

    if let Some(existing) = secrets.get_opt(&secret_name).await? {
        debug!("adopting existing credentials Secret {}", secret_name);
        return Ok(credentials_from_secret(&existing));
    }

    let creds = Credentials {
        user: generate_value(),
        password: generate_value(),
        database: generate_value(),
    };

    let mut string_data = BTreeMap::new();
    string_data.insert("user".to_string(), creds.user.clone());
    string_data.insert("password".to_string(), creds.password.clone());
    string_data.insert("database".to_string(), creds.database.clone());

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        string_data: Some(string_data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => {
            info!("created credentials Secret {}", secret_name);
            Ok(creds)
        }
        // Lost a race against a concurrent reconcile or a developer
        // pre-creating the Secret; adopt whatever won.
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let existing = secrets.get(&secret_name).await?;
            Ok(credentials_from_secret(&existing))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_value_shape() {
        let value = generate_value();
        assert_eq!(value.len(), 24);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = Credentials {
            user: "u".into(),
            password: "p".into(),
            database: "d".into(),
        };
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Credentials {
            password: "other".into(),
            ..a.clone()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_credentials_from_secret_missing_keys() {
        let secret = Secret::default();
        let creds = credentials_from_secret(&secret);
        assert_eq!(creds, Credentials::default());
    }
}
