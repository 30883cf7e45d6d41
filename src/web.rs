//! HTTP surface: the RBAC API, job administration and liveness, wrapped in
//! request tracing and security headers.
use crate::errors::GatehouseError;
use crate::jobs::{self, JobLogQuery};
use crate::rbac::errors::RbacError;
use crate::rbac::web::actor_from;
use crate::rbac::Gatehouse;
use crate::settings::Settings;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    // JSON only; nothing here should ever be cached by intermediaries
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );

    response
}

/// Full application router.
pub fn router(gatehouse: Gatehouse) -> Router {
    let admin = Router::new()
        .route("/v1/admin/jobs", get(list_jobs))
        .route("/v1/admin/jobs/{name}", post(trigger_job))
        .with_state(gatehouse.clone());

    crate::rbac::web::router(gatehouse)
        .merge(admin)
        .route("/healthz", get(health))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(settings: &Settings, gatehouse: Gatehouse) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    // NOTE: authentication happens upstream; this service trusts `x-actor-id`.
    // Bind it only where the gateway is the sole client.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "RBAC API listening");
    axum::serve(listener, router(gatehouse))
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn list_jobs(
    State(gatehouse): State<Gatehouse>,
    Query(query): Query<JobLogQuery>,
) -> Result<impl IntoResponse, GatehouseError> {
    let executions = jobs::list_job_executions(gatehouse.db(), &query).await?;
    Ok(Json(json!({
        "available": jobs::available_jobs(),
        "executions": executions,
    })))
}

async fn trigger_job(
    State(gatehouse): State<Gatehouse>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatehouseError> {
    let actor = actor_from(&headers)?;
    if !jobs::available_jobs().iter().any(|j| j.name == name) {
        return Err(RbacError::not_found("job", name).into());
    }
    tracing::info!(actor = %actor, job = %name, "Job triggered via API");
    let log = jobs::trigger_job_manually(&gatehouse, &name).await?;
    Ok(Json(log))
}
