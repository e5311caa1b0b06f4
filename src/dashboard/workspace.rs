use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding kindling's persisted state inside the repo.
/// Everything else lives in the Kubernetes API server.
pub const KINDLING_DIR: &str = ".kindling";

pub fn kindling_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(KINDLING_DIR)
}

pub fn tunnel_descriptor_path(repo_root: &Path) -> PathBuf {
    kindling_dir(repo_root).join("tunnel.json")
}

pub fn context_document_path(repo_root: &Path) -> PathBuf {
    kindling_dir(repo_root).join("context.json")
}

pub fn intel_state_path(repo_root: &Path) -> PathBuf {
    kindling_dir(repo_root).join("intel.json")
}

/// Write a JSON document under `.kindling/`, creating the directory on first
/// use.
pub fn write_state<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
}

pub fn read_state<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

pub fn remove_state(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tunnel_descriptor_path(tmp.path());

        assert!(read_state::<serde_json::Value>(&path).unwrap().is_none());

        write_state(&path, &json!({"url": "https://t.example", "pid": 42})).unwrap();
        let loaded: serde_json::Value = read_state(&path).unwrap().unwrap();
        assert_eq!(loaded["pid"], 42);

        remove_state(&path);
        assert!(!path.exists());
    }
}
