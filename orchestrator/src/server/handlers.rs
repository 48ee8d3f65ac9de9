//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use openapi_server::models::{
    CredentialStatusResponse, DeletedResponse, HealthResponse, NameRequest, ProbeRequest,
    SaveCredentialRequest, StartRunRequest, SvnCheckRequest, VersionResponse,
};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::deploy::RunOptions;
use crate::errors::DeployError;
use crate::models::node::Node;
use crate::models::resource::SvnResource;
use crate::models::task::{TaskDefinition, TaskPatch, TaskTemplate};
use crate::probe::{probe_many, ConnectivityProbe};
use crate::registry::{NodeRegistry, ResourceRegistry};
use crate::server::errors::{ApiError, ApiResult};
use crate::server::state::ServerState;
use crate::utils::version_info;
use crate::vault::Credential;

type AppState = State<Arc<ServerState>>;

/// Parse an optional JSON body; an empty body yields `T::default()`
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError(DeployError::JsonError(e)))
}

// ================================ SERVICE ======================================== //

pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deploymaster".to_string(),
        version: version.version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================= TASKS ========================================= //

pub async fn list_tasks_handler(State(state): AppState) -> impl IntoResponse {
    Json(state.app.tasks.list_tasks().await)
}

pub async fn get_task_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.tasks.get_task(&id).await?))
}

pub async fn create_task_handler(
    State(state): AppState,
    Json(task): Json<TaskDefinition>,
) -> ApiResult<impl IntoResponse> {
    let task = state.app.tasks.create_task(task).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task_handler(
    State(state): AppState,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.tasks.update_task(&id, patch).await?))
}

pub async fn delete_task_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.app.tasks.delete_task(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a run; the pipeline continues in the background
pub async fn start_run_handler(
    State(state): AppState,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: StartRunRequest = optional_json(&body)?;
    let run = state
        .app
        .orchestrator
        .start_run(
            &id,
            RunOptions {
                revision: request.revision,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

pub async fn task_runs_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.app.tasks.get_task(&id).await?;
    Ok(Json(state.app.orchestrator.list_runs(Some(&id)).await))
}

pub async fn delete_task_runs_handler(
    State(state): AppState,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.app.orchestrator.delete_runs_by_task(&id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

pub async fn save_as_template_handler(
    State(state): AppState,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: NameRequest = optional_json(&body)?;
    let template = state.app.tasks.save_as_template(&id, request.name).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

// =============================== TEMPLATES ======================================= //

pub async fn list_templates_handler(State(state): AppState) -> impl IntoResponse {
    Json(state.app.tasks.list_templates().await)
}

pub async fn get_template_handler(
    State(state): AppState,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.tasks.get_template(&id).await?))
}

pub async fn create_template_handler(
    State(state): AppState,
    Json(template): Json<TaskTemplate>,
) -> ApiResult<impl IntoResponse> {
    let template = state.app.tasks.create_template(template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn update_template_handler(
    State(state): AppState,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.tasks.update_template(&id, patch).await?))
}

pub async fn delete_template_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.app.tasks.delete_template(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn instantiate_template_handler(
    State(state): AppState,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: NameRequest = optional_json(&body)?;
    let task = state.app.tasks.instantiate_template(&id, request.name).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

// ================================== RUNS ========================================= //

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunsQuery {
    pub task_id: Option<String>,
}

pub async fn list_runs_handler(State(state): AppState, Query(query): Query<RunsQuery>) -> impl IntoResponse {
    Json(state.app.orchestrator.list_runs(query.task_id.as_deref()).await)
}

pub async fn get_run_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.orchestrator.get_run(&id).await?))
}

pub async fn delete_run_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.app.orchestrator.delete_run(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_run_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.orchestrator.cancel_run(&id).await?))
}

/// Server-sent stream of run progress, status and log lines
pub async fn events_handler(State(state): AppState) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.app.orchestrator.subscribe();
    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(run_event) => {
                    let event = Event::default()
                        .event("run")
                        .json_data(&run_event)
                        .unwrap_or_else(|_| Event::default().comment("unencodable event"));
                    return Some((Ok(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ================================= NODES ========================================= //

pub async fn list_nodes_handler(State(state): AppState) -> impl IntoResponse {
    Json(state.app.nodes.list_nodes().await)
}

pub async fn create_node_handler(State(state): AppState, Json(node): Json<Node>) -> ApiResult<impl IntoResponse> {
    let node = state.app.nodes.add_node(node).await?;
    info!(node_id = %node.id, "Added node {}", node.display_name());
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn update_node_handler(
    State(state): AppState,
    Path(id): Path<String>,
    Json(mut node): Json<Node>,
) -> ApiResult<impl IntoResponse> {
    node.id = id;
    state.app.nodes.update_node(node.clone()).await?;
    Ok(Json(node))
}

/// Remove a node together with its stored secrets and last probe result
pub async fn delete_node_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let removed = state.app.nodes.delete_node(&id).await?;
    state.app.vault.delete_all(&removed.id, removed.login()).await?;
    state.app.node_status.remove(&removed.id);
    info!(node_id = %removed.id, "Deleted node {}", removed.display_name());
    Ok(StatusCode::NO_CONTENT)
}

pub async fn topology_handler(State(state): AppState) -> impl IntoResponse {
    Json(state.app.nodes.topology().await)
}

/// Probe one node, optionally with ad-hoc credentials that are not stored
pub async fn probe_node_handler(
    State(state): AppState,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: ProbeRequest = optional_json(&body)?;
    let node = state
        .app
        .nodes
        .get_node(&id)
        .await
        .ok_or_else(|| DeployError::NotFound(format!("node {}", id)))?;

    let username = request
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let credential = request
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| Credential::with_password(username.unwrap_or(node.login()), p));

    let report = state.app.probe.probe(&node, username, credential).await;
    state.app.node_status.record(report.clone());
    Ok(Json(report))
}

pub async fn probe_all_handler(State(state): AppState) -> impl IntoResponse {
    let nodes = state.app.nodes.list_nodes().await;
    let probe: Arc<dyn ConnectivityProbe> = state.app.probe.clone();
    let reports = probe_many(probe, nodes).await;
    state.app.node_status.record_all(reports.clone());
    Json(reports)
}

pub async fn node_status_handler(State(state): AppState) -> impl IntoResponse {
    Json(state.app.node_status.all())
}

// =============================== RESOURCES ======================================= //

pub async fn list_resources_handler(State(state): AppState) -> impl IntoResponse {
    Json(state.app.resources.list_resources().await)
}

pub async fn create_resource_handler(
    State(state): AppState,
    Json(resource): Json<SvnResource>,
) -> ApiResult<impl IntoResponse> {
    let resource = state.app.resources.add_resource(resource).await?;
    info!(resource_id = %resource.id, "Added resource {}", resource.url);
    Ok((StatusCode::CREATED, Json(resource)))
}

/// Edit the descriptive fields of a resource. Mirror state (status,
/// revision, size) is owned by the mirror and left untouched.
pub async fn update_resource_handler(
    State(state): AppState,
    Path(id): Path<String>,
    Json(update): Json<SvnResource>,
) -> ApiResult<impl IntoResponse> {
    let mut resource = state
        .app
        .resources
        .get_resource(&id)
        .await
        .ok_or_else(|| DeployError::NotFound(format!("resource {}", id)))?;
    if url::Url::parse(update.url.trim()).is_err() {
        return Err(DeployError::ValidationError(format!("invalid repository url: {}", update.url)).into());
    }
    resource.url = update.url;
    resource.name = update.name;
    resource.resource_type = update.resource_type;
    resource.username = update.username;
    state.app.resources.update_resource(resource.clone()).await?;
    Ok(Json(resource))
}

pub async fn delete_resource_handler(State(state): AppState, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let removed = state.app.resources.delete_resource(&id).await?;
    state.app.vault.delete_all(&removed.id, &removed.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refresh_resource_handler(
    State(state): AppState,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.svn.refresh(&id).await?))
}

/// Test a repository URL with explicit credentials; failures are reported
/// in the body, not as an error status
pub async fn check_resource_handler(
    State(state): AppState,
    Json(request): Json<SvnCheckRequest>,
) -> impl IntoResponse {
    let username = request.username.unwrap_or_default();
    Json(
        state
            .app
            .svn
            .check(&request.url, &username, request.password.as_deref())
            .await,
    )
}

// ============================== CREDENTIALS ====================================== //

async fn credential_status(state: &ServerState, subject: &str, username: &str) -> CredentialStatusResponse {
    CredentialStatusResponse {
        subject_id: subject.to_string(),
        username: username.to_string(),
        has_password: state.app.vault.has_password(subject, username).await,
        has_passphrase: state.app.vault.has_passphrase(subject).await,
    }
}

/// Username a subject logs in with when the request names none
async fn default_username(state: &ServerState, subject: &str) -> Option<String> {
    if let Some(node) = state.app.nodes.get_node(subject).await {
        return Some(node.login().to_string());
    }
    state
        .app
        .resources
        .get_resource(subject)
        .await
        .map(|r| r.username)
        .filter(|u| !u.trim().is_empty())
}

pub async fn save_credential_handler(
    State(state): AppState,
    Path(subject): Path<String>,
    Json(request): Json<SaveCredentialRequest>,
) -> ApiResult<impl IntoResponse> {
    let password = request.password.filter(|p| !p.is_empty());
    let passphrase = request.passphrase.filter(|p| !p.is_empty());
    if password.is_none() && passphrase.is_none() {
        return Err(DeployError::ValidationError("password or passphrase is required".to_string()).into());
    }

    let username = match request.username.filter(|u| !u.trim().is_empty()) {
        Some(username) => username.trim().to_string(),
        None => default_username(&state, &subject).await.unwrap_or_default(),
    };

    if let Some(password) = password {
        if username.is_empty() {
            return Err(DeployError::ValidationError("username is required".to_string()).into());
        }
        state
            .app
            .vault
            .save_password(&subject, &username, &password, request.remember)
            .await?;
    }
    if let Some(passphrase) = passphrase {
        state
            .app
            .vault
            .save_passphrase(&subject, &passphrase, request.remember)
            .await?;
    }

    Ok(Json(credential_status(&state, &subject, &username).await))
}

pub async fn get_credential_handler(
    State(state): AppState,
    Path((subject, username)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(credential_status(&state, &subject, &username).await)
}

pub async fn delete_credential_handler(
    State(state): AppState,
    Path((subject, username)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.app.vault.delete_all(&subject, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}
