//! REST API handlers.
//!
//! Query handlers read the cluster cache; write handlers persist to the
//! `RecordStore` and then publish the resulting change event.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use fleetgrid_cluster::MAX_NOMINATION_TTL;
use fleetgrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_)
        | StateError::Conflict { .. }
        | StateError::NotTerminated(_)
        | StateError::Lifecycle(_) => StatusCode::CONFLICT,
        StateError::Immutable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

/// Hand a committed write to the change feed. A dropped event is
/// repaired by the next resync.
async fn publish(state: &ApiState, event: ChangeEvent) {
    let kind = event.kind();
    if let Err(e) = state.events.publish(event).await {
        warn!(kind, error = %e, "change event not published");
    }
}

fn deleted(kind: &str, revision: Option<Revision>) -> Response {
    match revision {
        Some(revision) => ApiResponse::ok(serde_json::json!({ "deleted": true, "revision": revision }))
            .into_response(),
        None => error_response(&format!("{kind} not found"), StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Machines ───────────────────────────────────────────────────

/// GET /api/v1/machines
pub async fn list_machines(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.cluster.snapshot();
    let machines: Vec<&Machine> = snapshot.machines.values().map(|m| m.as_ref()).collect();
    ApiResponse::ok(machines).into_response()
}

/// POST /api/v1/machines
pub async fn put_machine(
    State(state): State<ApiState>,
    Json(machine): Json<Machine>,
) -> impl IntoResponse {
    match state.store.put_machine(&machine) {
        Ok(stored) => {
            publish(&state, ChangeEvent::Machine(Change::Upserted(stored.clone()))).await;
            ApiResponse::ok(stored).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// DELETE /api/v1/machines/:name
pub async fn delete_machine(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_machine(&name) {
        Ok(Some(revision)) => {
            publish(&state, ChangeEvent::Machine(Change::Deleted { key: name, revision })).await;
            deleted("machine", Some(revision))
        }
        Ok(None) => deleted("machine", None),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/machines/:name/workloads
pub async fn machine_workloads(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let workloads = state.cluster.workloads_on(&name);
    let workloads: Vec<&Workload> = workloads.iter().map(|w| w.as_ref()).collect();
    ApiResponse::ok(workloads).into_response()
}

// ── Workloads ──────────────────────────────────────────────────

/// GET /api/v1/workloads
pub async fn list_workloads(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.cluster.snapshot();
    let workloads: Vec<&Workload> = snapshot.workloads.values().map(|w| w.as_ref()).collect();
    ApiResponse::ok(workloads).into_response()
}

/// POST /api/v1/workloads
pub async fn put_workload(
    State(state): State<ApiState>,
    Json(workload): Json<Workload>,
) -> impl IntoResponse {
    match state.store.put_workload(&workload) {
        Ok(stored) => {
            publish(&state, ChangeEvent::Workload(Change::Upserted(stored.clone()))).await;
            ApiResponse::ok(stored).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// DELETE /api/v1/workloads/:namespace/:name
pub async fn delete_workload(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("{namespace}/{name}");
    match state.store.delete_workload(&key) {
        Ok(Some(revision)) => {
            publish(&state, ChangeEvent::Workload(Change::Deleted { key, revision })).await;
            deleted("workload", Some(revision))
        }
        Ok(None) => deleted("workload", None),
        Err(e) => state_error(&e),
    }
}

// ── Node pools ─────────────────────────────────────────────────

/// GET /api/v1/nodepools
pub async fn list_node_pools(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.cluster.snapshot();
    let pools: Vec<&NodePool> = snapshot.node_pools.values().map(|p| p.as_ref()).collect();
    ApiResponse::ok(pools).into_response()
}

/// POST /api/v1/nodepools
pub async fn put_node_pool(
    State(state): State<ApiState>,
    Json(pool): Json<NodePool>,
) -> impl IntoResponse {
    match state.store.put_node_pool(&pool) {
        Ok(stored) => {
            info!(pool = %stored.name, hash = %stored.template_hash(), "node pool stored");
            publish(&state, ChangeEvent::NodePool(Change::Upserted(stored.clone()))).await;
            ApiResponse::ok(stored).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// DELETE /api/v1/nodepools/:name
pub async fn delete_node_pool(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_node_pool(&name) {
        Ok(Some(revision)) => {
            publish(&state, ChangeEvent::NodePool(Change::Deleted { key: name, revision })).await;
            deleted("node pool", Some(revision))
        }
        Ok(None) => deleted("node pool", None),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/nodepools/:name/budget
pub async fn node_pool_budget(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.cluster.snapshot();
    if !snapshot.node_pools.contains_key(&name) {
        return error_response("node pool not found", StatusCode::NOT_FOUND).into_response();
    }
    ApiResponse::ok(serde_json::json!({
        "node_pool": name,
        "allowed_disruptions": snapshot.allowed_disruptions(&name),
    }))
    .into_response()
}

// ── Node claims ────────────────────────────────────────────────

/// GET /api/v1/nodeclaims
pub async fn list_node_claims(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.cluster.snapshot();
    let claims: Vec<&NodeClaim> = snapshot.node_claims.values().map(|c| c.as_ref()).collect();
    ApiResponse::ok(claims).into_response()
}

/// GET /api/v1/nodeclaims/:name
pub async fn get_node_claim(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.cluster.node_claim(&name) {
        Some(claim) => ApiResponse::ok(claim.as_ref()).into_response(),
        None => error_response("node claim not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/nodeclaims
pub async fn create_node_claim(
    State(state): State<ApiState>,
    Json(claim): Json<NodeClaim>,
) -> impl IntoResponse {
    if claim.node_pool.is_none() {
        return error_response("node_pool is required", StatusCode::UNPROCESSABLE_ENTITY)
            .into_response();
    }
    let now = state.cluster.clock().epoch_secs();
    match state.store.create_node_claim(&claim, now) {
        Ok(stored) => {
            info!(claim = %stored.name, "node claim created");
            publish(&state, ChangeEvent::NodeClaim(Change::Upserted(stored.clone()))).await;
            (StatusCode::CREATED, ApiResponse::ok(stored)).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// PUT /api/v1/nodeclaims/:name
///
/// Replaces requirements and template hash. The body's `revision` must
/// match the stored one.
pub async fn update_node_claim(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(claim): Json<NodeClaim>,
) -> impl IntoResponse {
    if claim.name != name {
        return error_response("name does not match path", StatusCode::UNPROCESSABLE_ENTITY)
            .into_response();
    }
    match state.store.update_node_claim(&claim) {
        Ok(stored) => {
            info!(claim = %name, revision = stored.revision, "node claim updated");
            publish(&state, ChangeEvent::NodeClaim(Change::Upserted(stored.clone()))).await;
            ApiResponse::ok(stored).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// Lifecycle progress reported by the provisioner.
#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub phase: Phase,
    #[serde(flatten)]
    pub binding: Binding,
}

/// POST /api/v1/nodeclaims/:name/lifecycle
pub async fn transition_node_claim(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<LifecycleRequest>,
) -> impl IntoResponse {
    let now = state.cluster.clock().epoch_secs();
    match state
        .store
        .transition_node_claim(&name, req.phase, &req.binding, now)
    {
        Ok(stored) => {
            info!(claim = %name, phase = ?req.phase, "node claim transitioned");
            publish(&state, ChangeEvent::NodeClaim(Change::Upserted(stored.clone()))).await;
            ApiResponse::ok(stored).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// DELETE /api/v1/nodeclaims/:name
pub async fn delete_node_claim(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_node_claim(&name) {
        Ok(Some(revision)) => {
            publish(&state, ChangeEvent::NodeClaim(Change::Deleted { key: name, revision })).await;
            deleted("node claim", Some(revision))
        }
        Ok(None) => deleted("node claim", None),
        Err(e) => state_error(&e),
    }
}

// ── Nominations ────────────────────────────────────────────────

/// GET /api/v1/nominations
pub async fn list_nominations(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.cluster.nominations().active()).into_response()
}

/// Nomination request from the placement path.
#[derive(Debug, Deserialize)]
pub struct NominateRequest {
    pub provider_id: ProviderId,
    pub ttl_secs: u64,
}

/// POST /api/v1/nominations
pub async fn nominate(
    State(state): State<ApiState>,
    Json(req): Json<NominateRequest>,
) -> impl IntoResponse {
    let max = MAX_NOMINATION_TTL.as_secs();
    if req.ttl_secs == 0 || req.ttl_secs > max {
        return error_response(
            &format!("ttl_secs must be between 1 and {max}"),
            StatusCode::UNPROCESSABLE_ENTITY,
        )
        .into_response();
    }
    let event = ChangeEvent::Nominated {
        provider_id: req.provider_id.clone(),
        ttl_secs: req.ttl_secs,
    };
    match state.events.publish(event).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "provider_id": req.provider_id,
                "ttl_secs": req.ttl_secs,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response(),
    }
}

// ── Operator views ─────────────────────────────────────────────

/// GET /api/v1/diagnostics
pub async fn diagnostics(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.diagnostics.list()).into_response()
}

/// GET /api/v1/snapshot
pub async fn snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.cluster.snapshot().summary()).into_response()
}
