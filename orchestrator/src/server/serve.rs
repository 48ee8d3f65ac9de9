//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::*;
use crate::server::state::ServerState;

/// Build the API router
pub fn router(state: Arc<ServerState>, cors_origins: &[String]) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Tasks
        .route("/tasks", get(list_tasks_handler).post(create_task_handler))
        .route(
            "/tasks/{id}",
            get(get_task_handler)
                .put(update_task_handler)
                .delete(delete_task_handler),
        )
        .route(
            "/tasks/{id}/runs",
            get(task_runs_handler)
                .post(start_run_handler)
                .delete(delete_task_runs_handler),
        )
        .route("/tasks/{id}/template", post(save_as_template_handler))
        // Templates
        .route("/templates", get(list_templates_handler).post(create_template_handler))
        .route(
            "/templates/{id}",
            get(get_template_handler)
                .put(update_template_handler)
                .delete(delete_template_handler),
        )
        .route("/templates/{id}/instantiate", post(instantiate_template_handler))
        // Runs
        .route("/runs", get(list_runs_handler))
        .route("/runs/{id}", get(get_run_handler).delete(delete_run_handler))
        .route("/runs/{id}/cancel", post(cancel_run_handler))
        .route("/events", get(events_handler))
        // Nodes
        .route("/nodes", get(list_nodes_handler).post(create_node_handler))
        .route("/nodes/probe", post(probe_all_handler))
        .route("/nodes/status", get(node_status_handler))
        .route("/nodes/{id}", put(update_node_handler).delete(delete_node_handler))
        .route("/nodes/{id}/probe", post(probe_node_handler))
        .route("/topology", get(topology_handler))
        // SVN resources
        .route("/resources", get(list_resources_handler).post(create_resource_handler))
        .route("/resources/check", post(check_resource_handler))
        .route(
            "/resources/{id}",
            put(update_resource_handler).delete(delete_resource_handler),
        )
        .route("/resources/{id}/refresh", post(refresh_resource_handler))
        // Credentials
        .route("/credentials/{subject}", put(save_credential_handler))
        .route(
            "/credentials/{subject}/{username}",
            get(get_credential_handler).delete(delete_credential_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(state, &options.cors_origins);

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
