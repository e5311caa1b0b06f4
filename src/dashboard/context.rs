use crate::deps;
use crate::sync::watcher::is_excluded;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

/// One service directory discovered under the repo root
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiscoveredService {
    pub path: String,
    pub language: String,
    pub has_dockerfile: bool,
    /// Env var names the source reads that nothing in kindling manages
    pub env_vars: Vec<String>,
}

const LANGUAGE_MARKERS: &[(&str, &str)] = &[
    ("go.mod", "go"),
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("requirements.txt", "python"),
    ("pyproject.toml", "python"),
    ("pom.xml", "java"),
    ("Gemfile", "ruby"),
    ("mix.exs", "elixir"),
    ("composer.json", "php"),
];

fn detect_language(dir: &Path) -> Option<&'static str> {
    LANGUAGE_MARKERS
        .iter()
        .find(|(marker, _)| dir.join(marker).exists())
        .map(|(_, language)| *language)
}

/// Patterns matching environment variable reads across the languages the
/// discovery cares about.
fn env_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Go: os.Getenv("X") / os.LookupEnv("X")
            r#"os\.(?:Getenv|LookupEnv)\(\s*"([A-Z][A-Z0-9_]*)"\s*\)"#,
            // JS/TS: process.env.X and process.env["X"]
            r#"process\.env\.([A-Z][A-Z0-9_]*)"#,
            r#"process\.env\[["']([A-Z][A-Z0-9_]*)["']\]"#,
            // Python: os.environ["X"] / os.environ.get("X") / os.getenv("X")
            r#"os\.environ(?:\.get)?[\[\(]["']([A-Z][A-Z0-9_]*)["']"#,
            r#"os\.getenv\(\s*["']([A-Z][A-Z0-9_]*)["']"#,
            // Ruby: ENV["X"]
            r#"ENV\[["']([A-Z][A-Z0-9_]*)["']\]"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

const SCANNED_EXTENSIONS: &[&str] = &["go", "js", "ts", "jsx", "tsx", "py", "rb", "php", "rs"];

/// Scan a service directory for env var reads, suppressing the names the
/// dependency registry injects itself (DATABASE_URL and friends).
pub fn scan_env_vars(dir: &Path) -> Result<Vec<String>> {
    let managed: BTreeSet<String> = deps::managed_env_var_names().into_iter().collect();
    let mut found = BTreeSet::new();
    scan_dir(dir, dir, &mut found, 0)?;
    Ok(found
        .into_iter()
        .filter(|name| !managed.contains(name))
        .collect())
}

fn scan_dir(root: &Path, dir: &Path, found: &mut BTreeSet<String>, depth: u8) -> Result<()> {
    if depth > 4 {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if is_excluded(root, &path) {
            continue;
        }
        if path.is_dir() {
            scan_dir(root, &path, found, depth + 1)?;
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SCANNED_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for pattern in env_patterns() {
            for capture in pattern.captures_iter(&content) {
                found.insert(capture[1].to_string());
            }
        }
    }
    Ok(())
}

/// Discover service directories under the repo root: the root itself plus
/// any first- or second-level directory carrying a language marker.
pub fn discover_services(root: &Path) -> Result<Vec<DiscoveredService>> {
    let mut services = Vec::new();
    let mut candidates = vec![root.to_path_buf()];

    for entry in std::fs::read_dir(root)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() || is_excluded(root, &path) {
            continue;
        }
        candidates.push(path.clone());
        if let Ok(children) = std::fs::read_dir(&path) {
            for child in children.filter_map(|e| e.ok()) {
                let child_path = child.path();
                if child_path.is_dir() && !is_excluded(root, &child_path) {
                    candidates.push(child_path);
                }
            }
        }
    }

    for dir in candidates {
        let Some(language) = detect_language(&dir) else {
            continue;
        };
        let relative = dir
            .strip_prefix(root)
            .unwrap_or(&dir)
            .to_string_lossy()
            .to_string();
        services.push(DiscoveredService {
            path: if relative.is_empty() {
                ".".to_string()
            } else {
                relative
            },
            language: language.to_string(),
            has_dockerfile: dir.join("Dockerfile").exists(),
            env_vars: scan_env_vars(&dir).unwrap_or_default(),
        });
    }

    services.sort_by(|a, b| a.path.cmp(&b.path));
    services.dedup_by(|a, b| a.path == b.path);
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_env_vars_flags_reads() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("main.go"),
            r#"package main
func main() {
    key := os.Getenv("X_API_KEY")
    _ = os.LookupEnv("FEATURE_FLAG")
}
"#,
        )
        .unwrap();
        let vars = scan_env_vars(tmp.path()).unwrap();
        assert!(vars.contains(&"X_API_KEY".to_string()));
        assert!(vars.contains(&"FEATURE_FLAG".to_string()));
    }

    #[test]
    fn test_scan_env_vars_suppresses_managed_names() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("db.py"),
            "import os\nurl = os.environ[\"DATABASE_URL\"]\nkey = os.getenv('S3_KEY')\n",
        )
        .unwrap();
        let vars = scan_env_vars(tmp.path()).unwrap();
        // DATABASE_URL is dependency-managed, so only the unmanaged read
        // survives
        assert!(!vars.contains(&"DATABASE_URL".to_string()));
        assert!(vars.contains(&"S3_KEY".to_string()));
    }

    #[test]
    fn test_scan_js_and_ruby_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("app.js"), "const k = process.env.API_TOKEN;\n").unwrap();
        fs::write(tmp.path().join("conf.rb"), "token = ENV[\"RB_TOKEN\"]\n").unwrap();
        let vars = scan_env_vars(tmp.path()).unwrap();
        assert!(vars.contains(&"API_TOKEN".to_string()));
        assert!(vars.contains(&"RB_TOKEN".to_string()));
    }

    #[test]
    fn test_discover_services() {
        let tmp = tempfile::tempdir().unwrap();
        let api = tmp.path().join("api");
        fs::create_dir(&api).unwrap();
        fs::write(api.join("go.mod"), "module api\n").unwrap();
        fs::write(api.join("Dockerfile"), "FROM scratch\n").unwrap();
        let web = tmp.path().join("web");
        fs::create_dir(&web).unwrap();
        fs::write(web.join("package.json"), "{}").unwrap();

        let services = discover_services(tmp.path()).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].path, "api");
        assert_eq!(services[0].language, "go");
        assert!(services[0].has_dockerfile);
        assert_eq!(services[1].path, "web");
        assert!(!services[1].has_dockerfile);
    }
}
