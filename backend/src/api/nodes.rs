use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{CreateNode, Liveness, Node, NodeRecord, NodeStatus, UpdateNode};

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Node name must not be empty"));
    }
    Ok(name.to_string())
}

async fn find_record(state: &AppState, id: &str) -> AppResult<NodeRecord> {
    state
        .db
        .get_node(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Node not found: {}", id)))
}

/// List nodes with their current status
#[utoipa::path(
    get,
    path = "/nodes",
    tag = "nodes",
    responses(
        (status = 200, description = "Registered nodes", body = Vec<Node>),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn list(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Node>>> {
    let records = state.db.list_nodes().await?;

    let mut nodes = Vec::with_capacity(records.len());
    for record in records {
        let status = state.heartbeat.liveness_of(&record.id).await;
        nodes.push(Node::from_record(record, status));
    }

    Ok(ApiResponse::success(nodes))
}

/// Get a node, including its base64 client tunnel configuration
#[utoipa::path(
    get,
    path = "/nodes/{id}",
    tag = "nodes",
    params(
        ("id" = String, Path, description = "Node ID")
    ),
    responses(
        (status = 200, description = "Node found", body = Node),
        (status = 404, description = "Node not found")
    ),
    security(("bearer" = []))
)]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Node>> {
    let record = find_record(&state, &id).await?;
    let status = state.heartbeat.liveness_of(&id).await;
    let tunnel_config = state.provisioner.client_config(&id).await;

    Ok(ApiResponse::success(
        Node::from_record(record, status).with_tunnel_config(tunnel_config),
    ))
}

/// Register a node and provision its tunnel peer
#[utoipa::path(
    post,
    path = "/nodes",
    tag = "nodes",
    request_body = CreateNode,
    responses(
        (status = 201, description = "Node created", body = Node),
        (status = 400, description = "Invalid name or operating system"),
        (status = 403, description = "Node limit reached"),
        (status = 500, description = "Tunnel provisioning failed")
    ),
    security(("bearer" = []))
)]
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateNode>, JsonRejection>,
) -> AppResult<Response> {
    let req = payload(body)?;
    let name = validate_name(&req.name)?;

    let existing = state.db.count_nodes().await?;
    if existing >= state.config.max_nodes {
        return Err(AppError::Forbidden(format!(
            "Node limit of {} reached",
            state.config.max_nodes
        )));
    }

    let id = Uuid::new_v4().to_string();
    let peer = state.provisioner.provision(&id).await?;

    let now = Utc::now();
    let record = NodeRecord {
        id: id.clone(),
        name,
        operating_system: req.operating_system,
        tunnel_address: peer.tunnel_address,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_node(&record).await?;

    info!(node_id = %id, address = %record.tunnel_address, "Node created");

    let tunnel_config = state.provisioner.client_config(&id).await;
    let node = Node::from_record(record, Liveness::Down)
        .with_tunnel_config(tunnel_config);

    Ok((StatusCode::CREATED, ApiResponse::success(node)).into_response())
}

/// Rename a node or change its operating system
#[utoipa::path(
    put,
    path = "/nodes/{id}",
    tag = "nodes",
    params(
        ("id" = String, Path, description = "Node ID")
    ),
    request_body = UpdateNode,
    responses(
        (status = 200, description = "Node updated", body = Node),
        (status = 400, description = "Invalid name or operating system"),
        (status = 404, description = "Node not found")
    ),
    security(("bearer" = []))
)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateNode>, JsonRejection>,
) -> AppResult<ApiResponse<Node>> {
    let req = payload(body)?;
    let update = UpdateNode {
        name: validate_name(&req.name)?,
        operating_system: req.operating_system,
    };

    let record = state
        .db
        .update_node(&id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Node not found: {}", id)))?;
    let status = state.heartbeat.liveness_of(&id).await;

    Ok(ApiResponse::success(Node::from_record(record, status)))
}

/// Heartbeat from a node agent: refresh its liveness and announce it UP
#[utoipa::path(
    patch,
    path = "/nodes/{id}",
    tag = "nodes",
    params(
        ("id" = String, Path, description = "Node ID")
    ),
    responses(
        (status = 200, description = "Heartbeat recorded", body = NodeStatus),
        (status = 404, description = "Node not found"),
        (status = 503, description = "Liveness store unavailable")
    )
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<NodeStatus>> {
    find_record(&state, &id).await?;
    state.heartbeat.mark_up(&id).await?;

    let status = NodeStatus::up(id.as_str());
    if let Err(e) = state.status.publish(status.clone()).await {
        debug!(node_id = %id, error = %e, "UP event dropped");
    }

    Ok(ApiResponse::success(status))
}
