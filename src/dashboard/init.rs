use super::error::ApiError;
use super::models::ok_envelope;
use super::state::AppState;
use crate::crdgen;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const INGRESS_NGINX_MANIFEST: &str =
    "https://raw.githubusercontent.com/kubernetes/ingress-nginx/controller-v1.11.1/deploy/static/provider/cloud/deploy.yaml";

async fn run(cmd: &str, args: &[&str]) -> (bool, String) {
    match Command::new(cmd).args(args).output().await {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status.success(), text)
        }
        Err(e) => (false, format!("failed to run {}: {}", cmd, e)),
    }
}

async fn apply_stdin(manifest: &str) -> (bool, String) {
    let child = Command::new("kubectl")
        .args(["apply", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(e) => return (false, format!("failed to spawn kubectl: {}", e)),
    };
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(manifest.as_bytes()).await {
            return (false, format!("failed to write manifest: {}", e));
        }
    }
    match child.wait_with_output().await {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status.success(), text)
        }
        Err(e) => (false, format!("kubectl apply failed: {}", e)),
    }
}

fn line(step: &str, status: &str, message: &str) -> Bytes {
    let mut text = json!({ "step": step, "status": status, "message": message }).to_string();
    text.push('\n');
    Bytes::from(text)
}

/// Bring the local environment up, streaming newline-delimited JSON
/// progress: cluster creation, CRD installation, ingress controller.
pub async fn init(State(state): State<AppState>) -> Response {
    let cluster_name = state.settings.cluster.name.clone();
    let ingress_namespace = state.settings.cluster.ingress_controller.clone();
    let client = state.client.clone();

    let stream = async_stream::stream! {
        // Step 1: the cluster itself
        yield Ok::<Bytes, Infallible>(line("cluster", "running", "checking for existing cluster"));
        let (listed, clusters) = run("k3d", &["cluster", "list", "-o", "json"]).await;
        let exists = listed && clusters.contains(&format!("\"name\":\"{}\"", cluster_name));
        if exists {
            yield Ok(line("cluster", "ok", "cluster already exists"));
        } else {
            yield Ok(line("cluster", "running", "creating cluster (this can take a minute)"));
            let (created, output) = run(
                "k3d",
                &[
                    "cluster", "create", &cluster_name,
                    "--registry-create", "registry:5000",
                    "--port", "80:80@loadbalancer",
                ],
            )
            .await;
            if created {
                yield Ok(line("cluster", "ok", "cluster created"));
            } else {
                yield Ok(line("cluster", "error", output.trim()));
                return;
            }
        }

        // Step 2: CRDs
        yield Ok(line("crds", "running", "installing custom resource definitions"));
        match crdgen::manifests() {
            Ok(manifests) => {
                let (applied, output) = apply_stdin(&manifests).await;
                if applied {
                    yield Ok(line("crds", "ok", "CRDs installed"));
                } else {
                    yield Ok(line("crds", "error", output.trim()));
                    return;
                }
            }
            Err(e) => {
                yield Ok(line("crds", "error", &e.to_string()));
                return;
            }
        }

        // Step 3: ingress controller
        yield Ok(line("ingress", "running", "checking ingress controller"));
        let namespaces: kube::api::Api<k8s_openapi::api::core::v1::Namespace> =
            kube::api::Api::all(client.clone());
        let present = matches!(namespaces.get_opt(&ingress_namespace).await, Ok(Some(_)));
        if present {
            yield Ok(line("ingress", "ok", "ingress controller namespace present"));
        } else {
            let (applied, output) = run("kubectl", &["apply", "-f", INGRESS_NGINX_MANIFEST]).await;
            if applied {
                yield Ok(line("ingress", "ok", "ingress-nginx installed"));
            } else {
                yield Ok(line("ingress", "error", output.trim()));
                return;
            }
        }

        yield Ok(line("done", "ok", "environment ready"));
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .expect("static response builder")
}

/// Tear the whole local cluster down
pub async fn destroy_cluster(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (ok, output) = run(
        "k3d",
        &["cluster", "delete", &state.settings.cluster.name],
    )
    .await;
    if ok {
        Ok(ok_envelope(Some(format!(
            "cluster '{}' deleted",
            state.settings.cluster.name
        ))))
    } else {
        Err(ApiError::bad_request(format!(
            "cluster delete failed: {}",
            output.trim()
        )))
    }
}
