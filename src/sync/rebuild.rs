use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// A locally executed cross-compile producing one artifact to copy into the
/// container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBuild {
    /// Shell command, executed with the source directory as working dir
    pub command: String,
    /// Where the binary lands after the command succeeds
    pub artifact: PathBuf,
}

/// Rust target triple for a Kubernetes node architecture
pub fn rust_triple(arch: &str) -> &'static str {
    match arch {
        "arm64" => "aarch64-unknown-linux-musl",
        _ => "x86_64-unknown-linux-musl",
    }
}

/// .NET runtime identifier architecture component
fn dotnet_arch(arch: &str) -> &'static str {
    match arch {
        "arm64" => "arm64",
        _ => "x64",
    }
}

fn cargo_package_name(src: &Path) -> Result<String> {
    let manifest = std::fs::read_to_string(src.join("Cargo.toml"))
        .context("Cargo.toml not readable for rebuild")?;
    let re = Regex::new(r#"(?m)^\s*name\s*=\s*"([^"]+)""#).expect("static regex");
    re.captures(&manifest)
        .map(|c| c[1].to_string())
        .context("no package name in Cargo.toml")
}

fn dotnet_project_name(src: &Path) -> Result<String> {
    let entry = std::fs::read_dir(src)
        .context("source directory not readable")?
        .filter_map(|e| e.ok())
        .find(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "csproj" || ext == "fsproj")
                .unwrap_or(false)
        })
        .context("no .csproj/.fsproj found for rebuild")?;
    Ok(entry
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default())
}

/// Compose the cross-compile command for the detected language and the
/// target node platform.
pub fn compose_local_build(
    language: &str,
    src: &Path,
    target_os: &str,
    target_arch: &str,
    out_dir: &Path,
) -> Result<LocalBuild> {
    match language {
        "go" => {
            let artifact = out_dir.join("app");
            Ok(LocalBuild {
                command: format!(
                    "CGO_ENABLED=0 GOOS={} GOARCH={} go build -o {} .",
                    target_os,
                    target_arch,
                    artifact.display()
                ),
                artifact,
            })
        }
        "rust" => {
            let triple = rust_triple(target_arch);
            let name = cargo_package_name(src)?;
            Ok(LocalBuild {
                command: format!("cargo build --release --target {}", triple),
                artifact: src.join("target").join(triple).join("release").join(name),
            })
        }
        "dotnet" => {
            let rid = format!("{}-{}", target_os, dotnet_arch(target_arch));
            let name = dotnet_project_name(src)?;
            Ok(LocalBuild {
                command: format!(
                    "dotnet publish -c Release -r {} -p:PublishSingleFile=true \
                     --self-contained true -o {}",
                    rid,
                    out_dir.display()
                ),
                artifact: out_dir.join(name),
            })
        }
        other => bail!(
            "local rebuild is not supported for {} services; rebuild the image instead",
            other
        ),
    }
}

/// Execute the build in the source directory
pub async fn run_local_build(build: &LocalBuild, src: &Path) -> Result<()> {
    info!("running local build: {}", build.command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(&build.command)
        .current_dir(src)
        .output()
        .await
        .context("failed to spawn local build")?;
    if !output.status.success() {
        bail!(
            "local build failed:\n{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    if !build.artifact.exists() {
        bail!(
            "build succeeded but artifact {} is missing",
            build.artifact.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_build_command() {
        let tmp = tempfile::tempdir().unwrap();
        let build =
            compose_local_build("go", Path::new("/src"), "linux", "arm64", tmp.path()).unwrap();
        assert!(build.command.starts_with("CGO_ENABLED=0 GOOS=linux GOARCH=arm64 go build -o"));
        assert_eq!(build.artifact, tmp.path().join("app"));
    }

    #[test]
    fn test_rust_build_command() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("Cargo.toml"),
            "[package]\nname = \"demo-svc\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        let build =
            compose_local_build("rust", tmp.path(), "linux", "amd64", tmp.path()).unwrap();
        assert_eq!(
            build.command,
            "cargo build --release --target x86_64-unknown-linux-musl"
        );
        assert!(build
            .artifact
            .ends_with("target/x86_64-unknown-linux-musl/release/demo-svc"));
    }

    #[test]
    fn test_dotnet_build_command() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Api.csproj"), "<Project/>").unwrap();
        let build =
            compose_local_build("dotnet", tmp.path(), "linux", "amd64", tmp.path()).unwrap();
        assert!(build.command.contains("-r linux-x64"));
        assert_eq!(build.artifact, tmp.path().join("Api"));
    }

    #[test]
    fn test_unsupported_language() {
        let tmp = tempfile::tempdir().unwrap();
        let err = compose_local_build("java", tmp.path(), "linux", "amd64", tmp.path())
            .unwrap_err()
            .to_string();
        assert!(err.contains("not supported"));
    }
}
