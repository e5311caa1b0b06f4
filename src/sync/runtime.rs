use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use super::wrapper::WRAPPER_MARKER;

/// How a runtime picks up synced files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    /// Host re-reads files on every request; sync alone is sufficient
    None,
    /// Send a reload signal to PID 1; zero downtime
    Signal,
    /// Wrapper loop required; kill the child, the wrapper respawns it
    Kill,
    /// Source sync is useless; cross-compile locally and copy the artifact
    Rebuild,
    /// Static server fronting a JS build; rebuild the bundle and copy it
    FrontendBuild,
}

#[derive(Debug, Clone)]
pub struct RuntimeProfile {
    pub name: &'static str,
    pub mode: RestartMode,
    /// Reload signal name for Signal mode (e.g. "HUP")
    pub signal: Option<&'static str>,
    /// Language key used for rebuild command composition
    pub language: &'static str,
    /// Seconds to wait after a restart action before the workload settles
    pub wait_after: u64,
    pub interpreted: bool,
}

fn profile(
    name: &'static str,
    mode: RestartMode,
    signal: Option<&'static str>,
    language: &'static str,
    wait_after: u64,
    interpreted: bool,
) -> (&'static str, RuntimeProfile) {
    (
        name,
        RuntimeProfile {
            name,
            mode,
            signal,
            language,
            wait_after,
            interpreted,
        },
    )
}

/// Static process-basename → profile table
pub fn profiles() -> &'static HashMap<&'static str, RuntimeProfile> {
    static PROFILES: OnceLock<HashMap<&'static str, RuntimeProfile>> = OnceLock::new();
    PROFILES.get_or_init(|| {
        use RestartMode::*;
        HashMap::from([
            // Hosts that re-read sources on every request
            profile("php", None, Option::None, "php", 0, true),
            profile("php-fpm", None, Option::None, "php", 0, true),
            profile("nodemon", None, Option::None, "node", 0, true),
            // Zero-downtime reloads via signal
            profile("uvicorn", Signal, Some("HUP"), "python", 1, true),
            profile("gunicorn", Signal, Some("HUP"), "python", 1, true),
            profile("puma", Signal, Some("USR2"), "ruby", 1, true),
            profile("nginx", Signal, Some("HUP"), "static", 0, false),
            profile("caddy", Signal, Some("USR1"), "static", 0, false),
            // Interpreters that need a process restart
            profile("node", Kill, Option::None, "node", 1, true),
            profile("python", Kill, Option::None, "python", 1, true),
            profile("python3", Kill, Option::None, "python", 1, true),
            profile("ruby", Kill, Option::None, "ruby", 1, true),
            profile("elixir", Kill, Option::None, "elixir", 1, true),
            profile("perl", Kill, Option::None, "perl", 1, true),
            profile("lua", Kill, Option::None, "lua", 1, true),
            profile("julia", Kill, Option::None, "julia", 1, true),
            profile("Rscript", Kill, Option::None, "r", 1, true),
            profile("artisan", Kill, Option::None, "php", 1, true),
            // Compiled runtimes: sync the binary, not the sources
            profile("go", Rebuild, Option::None, "go", 1, false),
            profile("rust", Rebuild, Option::None, "rust", 1, false),
            profile("java", Rebuild, Option::None, "java", 2, false),
            profile("kotlin", Rebuild, Option::None, "java", 2, false),
            profile("dotnet", Rebuild, Option::None, "dotnet", 2, false),
            profile("zig", Rebuild, Option::None, "zig", 1, false),
            profile("cc", Rebuild, Option::None, "c", 1, false),
        ])
    })
}

/// Result of the detection protocol
#[derive(Debug, Clone)]
pub struct DetectedRuntime {
    /// Profile key, or "unknown"
    pub runtime: String,
    pub profile: Option<RuntimeProfile>,
    /// The command the container actually runs (inner command when the
    /// kindling wrapper is already applied)
    pub command: String,
    pub is_frontend: bool,
}

impl DetectedRuntime {
    pub fn mode(&self) -> RestartMode {
        if self.is_frontend {
            return RestartMode::FrontendBuild;
        }
        self.profile
            .as_ref()
            .map(|p| p.mode)
            .unwrap_or(RestartMode::None)
    }
}

/// `/proc/1/cmdline` is NUL-separated; normalise to spaces
pub fn normalize_cmdline(raw: &[u8]) -> String {
    let text: String = raw
        .iter()
        .map(|&b| if b == 0 { ' ' } else { b as char })
        .collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// If PID 1 runs the kindling wrapper, recover the wrapped command
pub fn extract_inner_command(cmdline: &str) -> String {
    if !cmdline.contains(WRAPPER_MARKER) {
        return cmdline.to_string();
    }
    let Some(start) = cmdline.find("while true; do ") else {
        return cmdline.to_string();
    };
    let rest = &cmdline[start + "while true; do ".len()..];
    match rest.find(" & echo $!") {
        Some(end) => rest[..end].to_string(),
        None => rest.to_string(),
    }
}

/// Strip versioned suffixes from a process basename:
/// `python3.12` → `python3`, `nginx:` → `nginx`, `ruby3.2` → `ruby3`
pub fn strip_version_suffix(base: &str) -> String {
    let base = base.trim_end_matches(':');
    match base.find('.') {
        Some(idx) => base[..idx].to_string(),
        None => base.to_string(),
    }
}

fn basename(token: &str) -> String {
    token.rsplit('/').next().unwrap_or(token).to_string()
}

fn lookup(name: &str) -> Option<RuntimeProfile> {
    let table = profiles();
    if let Some(profile) = table.get(name) {
        return Some(profile.clone());
    }
    let stripped = strip_version_suffix(name);
    if let Some(profile) = table.get(stripped.as_str()) {
        return Some(profile.clone());
    }
    // python3 → python, ruby3 → ruby
    let digitless = stripped.trim_end_matches(|c: char| c.is_ascii_digit());
    if !digitless.is_empty() {
        if let Some(profile) = table.get(digitless) {
            return Some(profile.clone());
        }
    }
    Option::None
}

/// Combinators launch a tool through an interpreter or shim; the tool, not
/// the interpreter, decides the strategy.
fn combinator_tool(tokens: &[String]) -> Option<String> {
    let first = tokens.first()?.as_str();
    match first {
        // python -m uvicorn / python3.12 -m gunicorn
        _ if strip_version_suffix(first).starts_with("python") => {
            let flag_pos = tokens.iter().position(|t| t == "-m")?;
            tokens.get(flag_pos + 1).cloned()
        }
        "bundle" if tokens.get(1).map(String::as_str) == Some("exec") => tokens.get(2).cloned(),
        "npx" => tokens.get(1).cloned(),
        "php" if tokens.get(1).map(String::as_str) == Some("artisan") => {
            Some("artisan".to_string())
        }
        _ => Option::None,
    }
}

/// Marker files that pin a language when the command line is inconclusive
const MARKERS: &[(&str, &str)] = &[
    ("go.mod", "go"),
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("pom.xml", "java"),
    ("build.gradle", "java"),
    ("build.gradle.kts", "kotlin"),
    ("requirements.txt", "python"),
    ("pyproject.toml", "python"),
    ("Gemfile", "ruby"),
    ("mix.exs", "elixir"),
    ("composer.json", "php"),
    ("build.zig", "zig"),
    ("CMakeLists.txt", "cc"),
];

pub fn detect_from_markers(src: &Path) -> Option<RuntimeProfile> {
    for (marker, runtime) in MARKERS {
        if src.join(marker).exists() {
            return profiles().get(runtime).cloned();
        }
    }
    Option::None
}

fn has_frontend_tooling(src: &Path) -> bool {
    const CONFIGS: &[&str] = &[
        "vite.config.js",
        "vite.config.ts",
        "next.config.js",
        "next.config.mjs",
        "next.config.ts",
        "angular.json",
        "svelte.config.js",
        "svelte.config.ts",
    ];
    if CONFIGS.iter().any(|c| src.join(c).exists()) {
        return true;
    }
    let Ok(package_json) = std::fs::read_to_string(src.join("package.json")) else {
        return false;
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&package_json) else {
        return false;
    };
    ["vite", "next", "@angular/core", "@sveltejs/kit"]
        .iter()
        .any(|dep| {
            parsed
                .pointer(&format!("/dependencies/{}", dep.replace('/', "~1")))
                .is_some()
                || parsed
                    .pointer(&format!("/devDependencies/{}", dep.replace('/', "~1")))
                    .is_some()
        })
}

fn has_build_script(src: &Path) -> bool {
    std::fs::read_to_string(src.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .and_then(|pkg| pkg.pointer("/scripts/build").cloned())
        .is_some()
}

/// Full detection protocol: command line first, marker files as a fallback,
/// then the frontend override on top.
pub fn detect(raw_cmdline: &[u8], src: Option<&Path>) -> DetectedRuntime {
    let normalized = normalize_cmdline(raw_cmdline);
    let command = extract_inner_command(&normalized);
    let tokens: Vec<String> = command.split_whitespace().map(str::to_string).collect();

    let mut profile = Option::None;
    if !tokens.is_empty() {
        if let Some(tool) = combinator_tool(&tokens) {
            profile = lookup(&basename(&tool));
        }
        if profile.is_none() {
            profile = lookup(&basename(&tokens[0]));
        }
    }
    if profile.is_none() {
        if let Some(src) = src {
            profile = detect_from_markers(src);
        }
    }

    // Frontend override: a static server in front of recognisable JS build
    // tooling means the bundle, not the config, is what syncs.
    let is_frontend = match (&profile, src) {
        (Some(p), Some(src)) if p.language == "static" => {
            has_build_script(src) && has_frontend_tooling(src)
        }
        _ => false,
    };

    DetectedRuntime {
        runtime: profile
            .as_ref()
            .map(|p| p.name.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        profile,
        command,
        is_frontend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn raw(cmd: &str) -> Vec<u8> {
        cmd.split(' ')
            .flat_map(|t| t.bytes().chain(std::iter::once(0)))
            .collect()
    }

    #[test]
    fn test_normalize_cmdline() {
        assert_eq!(normalize_cmdline(&raw("node server.js")), "node server.js");
        assert_eq!(normalize_cmdline(b"nginx\0-g\0daemon off;\0"), "nginx -g daemon off;");
    }

    #[test]
    fn test_detect_node() {
        let detected = detect(&raw("node server.js"), Option::None);
        assert_eq!(detected.runtime, "node");
        assert_eq!(detected.mode(), RestartMode::Kill);
        assert_eq!(detected.command, "node server.js");
    }

    #[test]
    fn test_detect_versioned_python() {
        let detected = detect(&raw("/usr/bin/python3.12 app.py"), Option::None);
        assert_eq!(detected.runtime, "python3");
        assert_eq!(detected.mode(), RestartMode::Kill);
    }

    #[test]
    fn test_detect_combinators() {
        let detected = detect(&raw("python -m uvicorn app:app"), Option::None);
        assert_eq!(detected.runtime, "uvicorn");
        assert_eq!(detected.mode(), RestartMode::Signal);

        let detected = detect(&raw("bundle exec puma -C config/puma.rb"), Option::None);
        assert_eq!(detected.runtime, "puma");

        let detected = detect(&raw("npx nodemon index.js"), Option::None);
        assert_eq!(detected.runtime, "nodemon");
        assert_eq!(detected.mode(), RestartMode::None);

        let detected = detect(&raw("php artisan serve"), Option::None);
        assert_eq!(detected.runtime, "artisan");
        assert_eq!(detected.mode(), RestartMode::Kill);
    }

    #[test]
    fn test_detect_wrapped_command_uses_inner() {
        let script = format!(
            "sh -c touch {} && while true; do node server.js & echo $! > /tmp/.kindling-app-pid; wait; sleep 1; done",
            WRAPPER_MARKER
        );
        let detected = detect(&raw(&script), Option::None);
        assert_eq!(detected.runtime, "node");
        assert_eq!(detected.command, "node server.js");
    }

    #[test]
    fn test_detect_from_markers() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("go.mod"), "module demo\n").unwrap();
        let detected = detect(&raw("/app/server"), Some(tmp.path()));
        assert_eq!(detected.runtime, "go");
        assert_eq!(detected.mode(), RestartMode::Rebuild);
    }

    #[test]
    fn test_frontend_override() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("package.json"),
            r#"{"scripts":{"build":"vite build"},"devDependencies":{"vite":"^5.0.0"}}"#,
        )
        .unwrap();
        let detected = detect(&raw("nginx -g daemon off;"), Some(tmp.path()));
        assert_eq!(detected.runtime, "nginx");
        assert!(detected.is_frontend);
        assert_eq!(detected.mode(), RestartMode::FrontendBuild);
    }

    #[test]
    fn test_nginx_without_frontend_tooling_stays_signal() {
        let tmp = tempfile::tempdir().unwrap();
        let detected = detect(&raw("nginx -g daemon off;"), Some(tmp.path()));
        assert_eq!(detected.mode(), RestartMode::Signal);
    }

    #[test]
    fn test_unknown_runtime() {
        let detected = detect(&raw("/app/server"), Option::None);
        assert_eq!(detected.runtime, "unknown");
        assert!(detected.profile.is_none());
    }
}
