use serde_json::{json, Value};

/// Marker file touched by the wrapper so detection can tell a patched
/// container from a fresh one
pub const WRAPPER_MARKER: &str = "/tmp/.kindling-sync-wrapper";

/// Where the wrapper records the child PID for the kill strategy
pub const PID_FILE: &str = "/tmp/.kindling-app-pid";

/// emptyDir holding busybox tools for shell-less containers
pub const DEBUG_TOOLS_VOLUME: &str = "debug-tools";
pub const DEBUG_TOOLS_PATH: &str = "/debug-tools";

const DEBUG_TOOLS: &[&str] = &[
    "sh", "tar", "cat", "kill", "chmod", "echo", "touch", "sleep", "ls",
];

/// POSIX single-quote escaping: the only metacharacter inside single quotes
/// is the single quote itself, which becomes `'\''`.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Join argv tokens back into a shell command line, quoting each token
pub fn shell_join(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| shell_quote(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The restart-wrapper script: touch the marker, then loop running the
/// original command in the background with its PID exposed, respawning it
/// whenever it exits.
pub fn wrapper_script(original_cmd: &str) -> String {
    format!(
        "touch {marker} && while true; do {cmd} & echo $! > {pid}; wait; sleep 1; done",
        marker = WRAPPER_MARKER,
        cmd = original_cmd,
        pid = PID_FILE,
    )
}

/// Strategic-merge patch replacing the container command with the wrapper.
///
/// With `distroless` set, the same single patch also injects the busybox
/// tools init container, the `debug-tools` emptyDir and a PATH override, so
/// the whole change lands in one rollout.
pub fn wrapper_patch(container: &str, original_cmd: &str, distroless: bool) -> Value {
    let script = wrapper_script(original_cmd);

    let mut container_patch = json!({
        "name": container,
        "command": ["sh", "-c", script],
    });
    let mut pod_patch = json!({
        "containers": [container_patch.clone()],
    });

    if distroless {
        let shell = format!("{}/sh", DEBUG_TOOLS_PATH);
        container_patch = json!({
            "name": container,
            "command": [shell, "-c", script],
            "env": [{
                "name": "PATH",
                "value": format!(
                    "{}:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
                    DEBUG_TOOLS_PATH
                ),
            }],
            "volumeMounts": [{
                "name": DEBUG_TOOLS_VOLUME,
                "mountPath": DEBUG_TOOLS_PATH,
            }],
        });

        let copy_tools = format!(
            "for tool in {}; do cp /bin/$tool {}/; done",
            DEBUG_TOOLS.join(" "),
            DEBUG_TOOLS_PATH
        );
        pod_patch = json!({
            "initContainers": [{
                "name": "kindling-debug-tools",
                "image": "busybox:1.36",
                "command": ["sh", "-c", copy_tools],
                "volumeMounts": [{
                    "name": DEBUG_TOOLS_VOLUME,
                    "mountPath": DEBUG_TOOLS_PATH,
                }],
            }],
            "containers": [container_patch],
            "volumes": [{
                "name": DEBUG_TOOLS_VOLUME,
                "emptyDir": {},
            }],
        });
    }

    json!({
        "spec": {
            "template": {
                "spec": pod_patch,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain_passthrough() {
        assert_eq!(shell_quote("node"), "node");
        assert_eq!(shell_quote("/app/server.js"), "/app/server.js");
    }

    #[test]
    fn test_shell_quote_specials() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("a&b"), "'a&b'");
        assert_eq!(shell_quote(r#"a\b"#), r#"'a\b'"#);
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_join_preserves_tokens() {
        let cmd = shell_join(&[
            "node".to_string(),
            "server.js".to_string(),
            "--name".to_string(),
            "a b & c".to_string(),
        ]);
        assert_eq!(cmd, "node server.js --name 'a b & c'");
    }

    // Re-splitting with a real shell would reproduce the original tokens;
    // here we assert the quoting survives the cases the wrapper embeds.
    #[test]
    fn test_shell_join_hostile_tokens() {
        let hostile = vec![
            "echo".to_string(),
            r#"double "quoted""#.to_string(),
            "single 'quoted'".to_string(),
            r#"back\slash"#.to_string(),
            "amp&ersand;semi".to_string(),
        ];
        let joined = shell_join(&hostile);
        assert!(joined.contains(r#"'double "quoted"'"#));
        assert!(joined.contains(r#"'single '\''quoted'\'''"#));
        assert!(joined.contains(r#"'back\slash'"#));
        assert!(joined.contains("'amp&ersand;semi'"));
    }

    #[test]
    fn test_wrapper_script_shape() {
        let script = wrapper_script("node server.js");
        assert!(script.starts_with(&format!("touch {}", WRAPPER_MARKER)));
        assert!(script.contains("while true; do node server.js & echo $! >"));
        assert!(script.contains(PID_FILE));
        assert!(script.ends_with("wait; sleep 1; done"));
    }

    #[test]
    fn test_wrapper_patch_plain() {
        let patch = wrapper_patch("app", "node server.js", false);
        let command = patch
            .pointer("/spec/template/spec/containers/0/command")
            .unwrap();
        assert_eq!(command[0], "sh");
        assert_eq!(command[1], "-c");
        assert!(patch
            .pointer("/spec/template/spec/initContainers")
            .is_none());
    }

    #[test]
    fn test_wrapper_patch_distroless_single_rollout() {
        let patch = wrapper_patch("app", "/app/server", true);
        let spec = patch.pointer("/spec/template/spec").unwrap();

        // One patch carries the tools init container, the volume, the PATH
        // override and the absolute-path shell together.
        assert_eq!(
            spec.pointer("/initContainers/0/name").unwrap(),
            "kindling-debug-tools"
        );
        assert_eq!(spec.pointer("/volumes/0/name").unwrap(), "debug-tools");
        assert_eq!(
            spec.pointer("/containers/0/command/0").unwrap(),
            "/debug-tools/sh"
        );
        let path = spec
            .pointer("/containers/0/env/0/value")
            .unwrap()
            .as_str()
            .unwrap();
        assert!(path.starts_with("/debug-tools:"));

        let copy_cmd = spec
            .pointer("/initContainers/0/command/2")
            .unwrap()
            .as_str()
            .unwrap();
        for tool in ["sh", "tar", "cat", "kill", "chmod", "echo", "touch", "sleep", "ls"] {
            assert!(copy_cmd.contains(tool), "missing tool {tool}");
        }
    }
}
