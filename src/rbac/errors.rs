use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RbacError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(gatehouse::rbac::invalid_argument),
        help("Roles must be one of admin, network_admin, security_admin, operator, viewer and permissions must exist in the catalog")
    )]
    InvalidArgument(String),

    #[error("User `{user_id}` already holds role `{role}`")]
    #[diagnostic(
        code(gatehouse::rbac::duplicate_assignment),
        help("The assignment already exists; treat this as success when retrying")
    )]
    DuplicateAssignment { user_id: String, role: String },

    #[error("Role `{role}` is already granted permission `{permission_id}`")]
    #[diagnostic(
        code(gatehouse::rbac::duplicate_grant),
        help("The grant already exists; treat this as success when retrying")
    )]
    DuplicateGrant { role: String, permission_id: String },

    #[error("{kind} `{id}` not found")]
    #[diagnostic(code(gatehouse::rbac::not_found))]
    NotFound { kind: &'static str, id: String },

    #[error("Storage unavailable for `{key}`: {reason}")]
    #[diagnostic(
        code(gatehouse::rbac::unavailable),
        help("The operation may be retried with the same arguments; duplicate detection keeps retries safe")
    )]
    Unavailable { key: String, reason: String },

    #[error("Policy state and audit trail disagree: {0}")]
    #[diagnostic(
        code(gatehouse::rbac::inconsistent),
        help("Every grant and assignment must have a matching audit event; investigate the database before accepting further writes")
    )]
    Inconsistent(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(gatehouse::rbac::internal))]
    Internal(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(gatehouse::rbac::db))]
    Storage(#[from] sea_orm::DbErr),
}

impl RbacError {
    /// Stable machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            RbacError::InvalidArgument(_) => "invalid_argument",
            RbacError::DuplicateAssignment { .. } => "duplicate_assignment",
            RbacError::DuplicateGrant { .. } => "duplicate_grant",
            RbacError::NotFound { .. } => "not_found",
            RbacError::Unavailable { .. } => "unavailable",
            RbacError::Inconsistent(_) => "inconsistent",
            RbacError::Internal(_) => "internal",
            RbacError::Storage(_) => "storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RbacError::Unavailable { .. })
    }

    /// Both duplicate variants mean "already in the requested state".
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            RbacError::DuplicateAssignment { .. } | RbacError::DuplicateGrant { .. }
        )
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RbacError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl IntoResponse for RbacError {
    fn into_response(self) -> Response {
        let status = match &self {
            RbacError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RbacError::DuplicateAssignment { .. } | RbacError::DuplicateGrant { .. } => {
                StatusCode::CONFLICT
            }
            RbacError::NotFound { .. } => StatusCode::NOT_FOUND,
            RbacError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RbacError::Inconsistent(_) | RbacError::Internal(_) | RbacError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut body = json!({ "error": self.code(), "message": self.to_string() });
        if let RbacError::Unavailable { key, .. } = &self {
            body["key"] = json!(key);
        }
        (status, Json(body)).into_response()
    }
}
