use serde::Serialize;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest. Enough to make
/// collisions between successive specs of the same object implausible while
/// staying readable in `kubectl describe` output.
const HASH_LEN: usize = 16;

/// Fingerprint the inputs to resource composition.
///
/// The value is a SHA-256 over the canonical JSON serialisation of `inputs`,
/// truncated to the first 16 hex characters. Reconcilers annotate every owned
/// resource with it and skip the Update API call when the annotation already
/// matches, so an unchanged spec causes zero writes.
pub fn spec_hash<T: Serialize>(inputs: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(inputs)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();
    Ok(format!("{:x}", digest)[..HASH_LEN].to_string())
}

/// Fingerprint several byte inputs in sequence (spec JSON, provider name,
/// startup script text) for the runner pool annotation.
pub fn chained_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    format!("{:x}", digest)[..HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        image: String,
        port: u16,
    }

    #[test]
    fn test_spec_hash_is_stable() {
        let a = Sample {
            image: "nginx:1".into(),
            port: 80,
        };
        let b = Sample {
            image: "nginx:1".into(),
            port: 80,
        };
        assert_eq!(spec_hash(&a).unwrap(), spec_hash(&b).unwrap());
    }

    #[test]
    fn test_spec_hash_changes_with_input() {
        let a = Sample {
            image: "nginx:1".into(),
            port: 80,
        };
        let b = Sample {
            image: "nginx:2".into(),
            port: 80,
        };
        assert_ne!(spec_hash(&a).unwrap(), spec_hash(&b).unwrap());
    }

    #[test]
    fn test_spec_hash_length() {
        let hash = spec_hash(&"anything").unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_chained_hash_order_matters() {
        let ab = chained_hash(&[b"a", b"b"]);
        let ba = chained_hash(&[b"b", b"a"]);
        assert_ne!(ab, ba);
        assert_eq!(ab.len(), 16);
    }
}
