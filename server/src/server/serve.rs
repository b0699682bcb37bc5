//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::DeployError;
use crate::server::handlers::{
    delete_deployment_handler, deploy_handler, get_deployment_handler, get_logs_handler,
    health_handler, list_deployments_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::server::ws::logs_ws_handler;
use crate::storage::settings::ServerSettings;

/// Start the HTTP server
pub async fn serve(
    options: &ServerSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let body_limit = (state.settings().build.max_archive_mb as usize + 1) * 1024 * 1024;

    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/api/deploy", post(deploy_handler))
        .route("/api/deployments", get(list_deployments_handler))
        .route(
            "/api/deployments/{id}",
            get(get_deployment_handler).delete(delete_deployment_handler),
        )
        .route("/api/deployments/{id}/logs", get(get_logs_handler))
        // Live logs
        .route("/ws/logs/{id}", get(logs_ws_handler))
        // State and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::ServerError(e.to_string()))
    });

    Ok(handle)
}
