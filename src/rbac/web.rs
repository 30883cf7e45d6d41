use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::rbac::errors::RbacError;
use crate::rbac::types::{
    AssignRoleRequest, AssignmentsQuery, AuditFilter, CheckRequest, CheckResponse,
    GrantPermissionRequest, GrantsQuery, IdResponse, Role,
};
use crate::rbac::Gatehouse;

/// Header carrying the authenticated caller, set by the upstream gateway.
pub const ACTOR_HEADER: &str = "x-actor-id";

pub fn router(gatehouse: Gatehouse) -> Router {
    Router::new()
        .route(
            "/v1/assignments",
            post(handle_assign_role).get(handle_list_assignments),
        )
        .route("/v1/assignments/{id}", delete(handle_remove_role))
        .route(
            "/v1/grants",
            post(handle_grant_permission).get(handle_list_grants),
        )
        .route("/v1/grants/toggle", post(handle_toggle_grant))
        .route("/v1/grants/{id}", delete(handle_revoke_permission))
        .route(
            "/v1/users/{user_id}/permissions",
            get(handle_effective_permissions),
        )
        .route("/v1/check", post(handle_check))
        .route("/v1/roles", get(handle_roles))
        .route("/v1/permissions", get(handle_permissions))
        .route("/v1/matrix", get(handle_matrix))
        .route("/v1/stats", get(handle_stats))
        .route("/v1/audit", get(handle_audit))
        .with_state(gatehouse)
}

/// Writes must name their actor.
pub fn actor_from(headers: &HeaderMap) -> Result<String, RbacError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RbacError::InvalidArgument(format!("missing `{ACTOR_HEADER}` header")))
}

async fn handle_assign_role(
    State(gatehouse): State<Gatehouse>,
    headers: HeaderMap,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, RbacError> {
    let actor = actor_from(&headers)?;
    let role: Role = req.role.parse()?;
    let assignment = gatehouse
        .coordinator()
        .assign_role(Some(&actor), &req.user_id, role)
        .await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id: assignment.id })))
}

async fn handle_list_assignments(
    State(gatehouse): State<Gatehouse>,
    Query(query): Query<AssignmentsQuery>,
) -> Result<impl IntoResponse, RbacError> {
    let assignments = gatehouse
        .engine()
        .list_assignments(query.user_id.as_deref())
        .await?;
    Ok(Json(assignments))
}

async fn handle_remove_role(
    State(gatehouse): State<Gatehouse>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, RbacError> {
    let actor = actor_from(&headers)?;
    let removed = gatehouse.coordinator().remove_role(Some(&actor), &id).await?;
    Ok(Json(IdResponse { id: removed.id }))
}

async fn handle_grant_permission(
    State(gatehouse): State<Gatehouse>,
    headers: HeaderMap,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<impl IntoResponse, RbacError> {
    let actor = actor_from(&headers)?;
    let role: Role = req.role.parse()?;
    let grant = gatehouse
        .coordinator()
        .grant_permission(Some(&actor), role, &req.permission_id)
        .await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id: grant.id })))
}

async fn handle_list_grants(
    State(gatehouse): State<Gatehouse>,
    Query(query): Query<GrantsQuery>,
) -> Result<impl IntoResponse, RbacError> {
    let role = query.role.as_deref().map(str::parse::<Role>).transpose()?;
    let grants = gatehouse.engine().list_grants(role).await?;
    Ok(Json(grants))
}

async fn handle_revoke_permission(
    State(gatehouse): State<Gatehouse>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, RbacError> {
    let actor = actor_from(&headers)?;
    let revoked = gatehouse
        .coordinator()
        .revoke_permission(Some(&actor), &id)
        .await?;
    Ok(Json(IdResponse { id: revoked.id }))
}

async fn handle_toggle_grant(
    State(gatehouse): State<Gatehouse>,
    headers: HeaderMap,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<impl IntoResponse, RbacError> {
    let actor = actor_from(&headers)?;
    let role: Role = req.role.parse()?;
    let outcome = gatehouse
        .coordinator()
        .toggle_grant(Some(&actor), role, &req.permission_id)
        .await?;
    Ok(Json(outcome))
}

async fn handle_effective_permissions(
    State(gatehouse): State<Gatehouse>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, RbacError> {
    let permissions = gatehouse.engine().effective_permissions(&user_id).await?;
    Ok(Json(permissions.to_vec()))
}

async fn handle_check(
    State(gatehouse): State<Gatehouse>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let allowed = gatehouse
        .engine()
        .is_authorized(&req.user_id, &req.resource, &req.action)
        .await;
    Json(CheckResponse { allowed })
}

async fn handle_roles(State(gatehouse): State<Gatehouse>) -> Result<impl IntoResponse, RbacError> {
    Ok(Json(gatehouse.engine().role_summaries().await?))
}

async fn handle_permissions(
    State(gatehouse): State<Gatehouse>,
) -> Result<impl IntoResponse, RbacError> {
    Ok(Json(gatehouse.engine().list_permissions().await?))
}

async fn handle_matrix(State(gatehouse): State<Gatehouse>) -> Result<impl IntoResponse, RbacError> {
    Ok(Json(gatehouse.engine().permission_matrix().await?))
}

async fn handle_stats(State(gatehouse): State<Gatehouse>) -> Result<impl IntoResponse, RbacError> {
    Ok(Json(gatehouse.engine().dashboard_stats().await?))
}

async fn handle_audit(
    State(gatehouse): State<Gatehouse>,
    Query(filter): Query<AuditFilter>,
) -> Result<impl IntoResponse, RbacError> {
    Ok(Json(gatehouse.query_audit_events(&filter).await?))
}
