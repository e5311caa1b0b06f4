pub mod actions;
pub mod context;
pub mod error;
pub mod expose;
pub mod init;
pub mod models;
pub mod read;
pub mod routes;
pub mod state;
pub mod workspace;

use crate::settings::Settings;

use anyhow::Result;
use axum::Router;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Run the dashboard HTTP server until SIGINT/SIGTERM
pub async fn run_server(settings: Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.dashboard.host, settings.dashboard.port);
    let state = AppState::new(settings).await?;

    let app = Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(routes::routes())
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    info!("dashboard listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop any session still running so teardown restores the deployments
    if let Some(handle) = state.sync.lock().await.take() {
        info!("stopping active sync session");
        handle.stop().await;
    }
    if let Some(tunnel) = state.tunnel.lock().await.take() {
        tunnel.stop().await;
    }

    info!("dashboard shutdown complete");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, shutting down gracefully");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down gracefully");
        },
    }
}
