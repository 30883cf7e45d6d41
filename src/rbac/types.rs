use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities;
use crate::rbac::errors::RbacError;

/// Resource type recorded on audit events for user -> role assignments.
pub const RESOURCE_USER_ROLE: &str = "user_role";
/// Resource type recorded on audit events for role -> permission grants.
pub const RESOURCE_ROLE_GRANT: &str = "role_grant";
/// Resource type recorded on audit events for catalog changes.
pub const RESOURCE_PERMISSION: &str = "permission";

pub const DEFAULT_AUDIT_LIMIT: u64 = 100;
pub const MAX_AUDIT_LIMIT: u64 = 1000;

const MAX_USER_ID_LEN: usize = 255;

/// The fixed set of roles known to this deployment. Roles are flat: holding
/// one never implies holding another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    NetworkAdmin,
    SecurityAdmin,
    Operator,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::NetworkAdmin,
        Role::SecurityAdmin,
        Role::Operator,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::NetworkAdmin => "network_admin",
            Role::SecurityAdmin => "security_admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Administrator",
            Role::NetworkAdmin => "Network Admin",
            Role::SecurityAdmin => "Security Admin",
            Role::Operator => "Operator",
            Role::Viewer => "Viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| RbacError::InvalidArgument(format!("unknown role `{s}`")))
    }
}

/// Closed set of audit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AssignRole,
    RemoveRole,
    AddPermission,
    RemovePermission,
    CreatePermission,
    UpdatePermission,
}

/// Coarse classification of an audit action, used by activity views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Additive,
    Modifying,
    Destructive,
}

impl AuditAction {
    const ALL: [AuditAction; 6] = [
        AuditAction::AssignRole,
        AuditAction::RemoveRole,
        AuditAction::AddPermission,
        AuditAction::RemovePermission,
        AuditAction::CreatePermission,
        AuditAction::UpdatePermission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AssignRole => "assign_role",
            AuditAction::RemoveRole => "remove_role",
            AuditAction::AddPermission => "add_permission",
            AuditAction::RemovePermission => "remove_permission",
            AuditAction::CreatePermission => "create_permission",
            AuditAction::UpdatePermission => "update_permission",
        }
    }

    pub fn severity(&self) -> AuditSeverity {
        match self {
            AuditAction::RemoveRole | AuditAction::RemovePermission => AuditSeverity::Destructive,
            AuditAction::UpdatePermission => AuditSeverity::Modifying,
            AuditAction::AssignRole | AuditAction::AddPermission | AuditAction::CreatePermission => {
                AuditSeverity::Additive
            }
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| RbacError::InvalidArgument(format!("unknown audit action `{s}`")))
    }
}

/// Validate an externally supplied user identifier.
pub fn validate_user_id(user_id: &str) -> Result<(), RbacError> {
    if user_id.trim().is_empty() {
        return Err(RbacError::InvalidArgument("user id must not be empty".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(RbacError::InvalidArgument(format!(
            "user id exceeds {MAX_USER_ID_LEN} bytes"
        )));
    }
    Ok(())
}

fn stored_role(value: &str) -> Result<Role, RbacError> {
    value
        .parse()
        .map_err(|_| RbacError::Internal(format!("unknown role `{value}` in storage")))
}

// ---------- Policy domain types ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Resource category, e.g. "logs"
    pub resource: String,
    /// Action verb, e.g. "view"
    pub action: String,
}

impl From<entities::permission::Model> for Permission {
    fn from(model: entities::permission::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            resource: model.resource,
            action: model.action,
        }
    }
}

/// Catalog entry as supplied by administrative configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub id: String,
    pub role: Role,
    pub permission_id: String,
    pub created_by: Option<String>,
    pub created_at: i64,
}

impl TryFrom<entities::role_grant::Model> for RoleGrant {
    type Error = RbacError;

    fn try_from(model: entities::role_grant::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            role: stored_role(&model.role)?,
            id: model.id,
            permission_id: model.permission_id,
            created_by: model.created_by,
            created_at: model.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub id: String,
    pub user_id: String,
    pub role: Role,
    pub created_by: Option<String>,
    pub created_at: i64,
}

impl TryFrom<entities::user_role::Model> for UserRoleAssignment {
    type Error = RbacError;

    fn try_from(model: entities::user_role::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            role: stored_role(&model.role)?,
            id: model.id,
            user_id: model.user_id,
            created_by: model.created_by,
            created_at: model.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub seq: i64,
    /// `None` for system-initiated changes
    pub actor_user_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Value,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

impl TryFrom<entities::audit_event::Model> for AuditEvent {
    type Error = RbacError;

    fn try_from(model: entities::audit_event::Model) -> Result<Self, Self::Error> {
        let action = model.action.parse().map_err(|_| {
            RbacError::Internal(format!("unknown audit action `{}` in storage", model.action))
        })?;
        let details = serde_json::from_str(&model.details)
            .map_err(|e| RbacError::Internal(format!("corrupt audit details: {e}")))?;
        Ok(Self {
            id: model.id,
            seq: model.seq,
            actor_user_id: model.actor_user_id,
            action,
            resource_type: model.resource_type,
            resource_id: model.resource_id,
            details,
            created_at: model.created_at,
        })
    }
}

/// An audit event before the ledger assigns its id, sequence and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub actor_user_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: Option<String>,
    pub details: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub limit: Option<u64>,
    /// Only events created strictly before this timestamp (ms)
    #[serde(alias = "before")]
    pub before_timestamp: Option<i64>,
    pub resource_type: Option<String>,
    pub action: Option<AuditAction>,
    pub actor: Option<String>,
}

impl AuditFilter {
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT)
    }
}

/// Result of a toggle request on a (role, permission) cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToggleOutcome {
    Granted { grant_id: String },
    Revoked { grant_id: String },
}

/// Result of syncing one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

// ---------- Read models ----------

#[derive(Debug, Clone, Serialize)]
pub struct MatrixCell {
    pub role: Role,
    pub granted: bool,
    pub grant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixRow {
    pub permission: Permission,
    pub cells: Vec<MatrixCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionMatrix {
    pub roles: Vec<Role>,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    /// Users holding at least one role
    pub total_users: u64,
    /// Roles held by at least one user
    pub active_roles: u64,
    pub permissions: u64,
    pub grants: u64,
    pub audit_events_last_24h: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleSummary {
    pub role: Role,
    pub display_name: &'static str,
    pub users: u64,
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub role: String,
    pub permission_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub user_id: String,
    /// e.g. "logs"
    pub resource: String,
    /// e.g. "view"
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

/// Id of the created or removed grant/assignment.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantsQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentsQuery {
    pub user_id: Option<String>,
}
