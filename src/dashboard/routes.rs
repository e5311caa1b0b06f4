use super::state::AppState;
use super::{actions, init, read};

use axum::routing::{delete, get, post};
use axum::Router;

/// All dashboard API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        // Cluster-level reads
        .route("/api/cluster", get(read::cluster))
        .route("/api/nodes", get(read::nodes))
        .route("/api/operator", get(read::operator))
        .route("/api/registry", get(read::registry))
        .route("/api/ingress-controller", get(read::ingress_controller))
        // Resource reads
        .route("/api/dses", get(read::dses))
        .route("/api/runners", get(read::runners))
        .route("/api/deployments", get(read::deployments))
        .route("/api/pods", get(read::pods))
        .route("/api/services", get(read::services))
        .route("/api/ingresses", get(read::ingresses))
        .route("/api/secrets", get(read::secrets))
        .route("/api/events", get(read::events))
        .route("/api/namespaces", get(read::namespaces))
        .route("/api/logs/{ns}/{pod}", get(read::logs))
        .route("/api/env/list/{ns}/{deployment}", get(read::env_list))
        .route("/api/runtime/{ns}/{deployment}", get(read::runtime))
        .route("/api/load-context", get(read::load_context))
        // Mutations
        .route("/api/deploy", post(actions::deploy))
        .route("/api/apply", post(actions::apply))
        .route("/api/dses/{ns}/{name}", delete(actions::delete_dse))
        .route("/api/secrets/create", post(actions::create_secret))
        .route("/api/secrets/{ns}/{name}", delete(actions::delete_secret))
        .route("/api/runners/create", post(actions::create_runner))
        .route("/api/reset-runners", post(actions::reset_runners))
        .route("/api/env/set", post(actions::env_set))
        .route("/api/env/unset", post(actions::env_unset))
        .route(
            "/api/expose",
            post(actions::expose_start).delete(actions::expose_stop),
        )
        .route("/api/expose/status", get(read::expose_status))
        .route("/api/cluster/destroy", post(init::destroy_cluster))
        .route("/api/init", post(init::init))
        .route("/api/restart/{ns}/{deployment}", post(actions::restart))
        .route("/api/scale/{ns}/{deployment}", post(actions::scale))
        .route("/api/pods/{ns}/{name}", delete(actions::delete_pod))
        .route(
            "/api/sync",
            post(actions::sync_start).delete(actions::sync_stop),
        )
        .route("/api/sync/status", get(read::sync_status))
        .route("/api/load", post(actions::load))
}
