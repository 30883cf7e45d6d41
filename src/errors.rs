use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::rbac::errors::RbacError;

#[derive(Debug, Error, Diagnostic)]
pub enum GatehouseError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(gatehouse::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(gatehouse::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(gatehouse::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(gatehouse::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Invalid catalog: {0}")]
    #[diagnostic(
        code(gatehouse::catalog),
        help("Catalog files contain `permission \"id\" resource=\"...\" action=\"...\" {{ name \"...\" }}` and `grant \"role\" {{ - \"permission_id\" }}` nodes")
    )]
    Catalog(String),

    #[error(transparent)]
    #[diagnostic(code(gatehouse::rbac))]
    Rbac(#[from] RbacError),

    #[error("{0}")]
    #[diagnostic(code(gatehouse::other))]
    Other(String),
}

impl From<kdl::KdlError> for GatehouseError {
    fn from(value: kdl::KdlError) -> Self {
        GatehouseError::Catalog(value.to_string())
    }
}

impl IntoResponse for GatehouseError {
    fn into_response(self) -> Response {
        match self {
            GatehouseError::Rbac(e) => e.into_response(),
            other => {
                tracing::error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal", "message": other.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
