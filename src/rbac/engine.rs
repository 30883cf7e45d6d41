use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::error;

use crate::rbac::cache::PermissionCache;
use crate::rbac::errors::RbacError;
use crate::rbac::types::{
    validate_user_id, DashboardStats, MatrixCell, MatrixRow, Permission, PermissionMatrix, Role,
    RoleGrant, RoleSummary, UserRoleAssignment,
};
use crate::rbac::{ledger, policy_store};
use crate::storage::now_millis;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Read-only view over the policy store answering authorization queries.
#[derive(Clone)]
pub struct AuthorizationEngine {
    db: DatabaseConnection,
    cache: Option<Arc<PermissionCache>>,
}

impl AuthorizationEngine {
    pub fn new(db: DatabaseConnection, cache: Option<Arc<PermissionCache>>) -> Self {
        Self { db, cache }
    }

    /// Union of the permissions granted to every role `user_id` holds,
    /// sorted by permission id.
    pub async fn effective_permissions(
        &self,
        user_id: &str,
    ) -> Result<Arc<Vec<Permission>>, RbacError> {
        validate_user_id(user_id)?;

        let Some(cache) = &self.cache else {
            let roles = policy_store::roles_for_user(&self.db, user_id).await?;
            return Ok(Arc::new(
                policy_store::permissions_for_roles(&self.db, &roles).await?,
            ));
        };

        if let Some(hit) = cache.get(user_id) {
            return Ok(hit);
        }
        let generation = cache.generation();
        let roles = policy_store::roles_for_user(&self.db, user_id).await?;
        let permissions = Arc::new(policy_store::permissions_for_roles(&self.db, &roles).await?);
        cache.insert(user_id, roles, permissions.clone(), generation);
        Ok(permissions)
    }

    /// Whether `user_id` may perform `action` on `resource`. Storage errors
    /// are returned to the caller.
    pub async fn check(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, RbacError> {
        let permissions = self.effective_permissions(user_id).await?;
        Ok(permissions
            .iter()
            .any(|p| p.resource == resource && p.action == action))
    }

    /// Fail-closed variant of [`check`](Self::check): any error denies.
    pub async fn is_authorized(&self, user_id: &str, resource: &str, action: &str) -> bool {
        match self.check(user_id, resource, action).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(user_id, resource, action, error = %e, "Authorization check failed; denying");
                false
            }
        }
    }

    pub async fn roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, RbacError> {
        validate_user_id(user_id)?;
        policy_store::roles_for_user(&self.db, user_id).await
    }

    pub async fn list_role_assignment_counts(&self) -> Result<BTreeMap<Role, u64>, RbacError> {
        policy_store::count_assignments_by_role(&self.db).await
    }

    /// Role catalog with display names and holder counts.
    pub async fn role_summaries(&self) -> Result<Vec<RoleSummary>, RbacError> {
        let counts = self.list_role_assignment_counts().await?;
        Ok(Role::ALL
            .into_iter()
            .map(|role| RoleSummary {
                role,
                display_name: role.display_name(),
                users: counts.get(&role).copied().unwrap_or(0),
            })
            .collect())
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, RbacError> {
        policy_store::list_permissions(&self.db).await
    }

    pub async fn list_grants(&self, role: Option<Role>) -> Result<Vec<RoleGrant>, RbacError> {
        policy_store::list_grants(&self.db, role).await
    }

    pub async fn list_assignments(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<UserRoleAssignment>, RbacError> {
        if let Some(user_id) = user_id {
            validate_user_id(user_id)?;
        }
        policy_store::list_assignments(&self.db, user_id).await
    }

    /// Every permission against every role.
    pub async fn permission_matrix(&self) -> Result<PermissionMatrix, RbacError> {
        let permissions = policy_store::list_permissions(&self.db).await?;
        let grants: HashMap<(Role, String), String> = policy_store::list_grants(&self.db, None)
            .await?
            .into_iter()
            .map(|g| ((g.role, g.permission_id), g.id))
            .collect();

        let rows = permissions
            .into_iter()
            .map(|permission| {
                let cells = Role::ALL
                    .into_iter()
                    .map(|role| {
                        let grant_id = grants.get(&(role, permission.id.clone())).cloned();
                        MatrixCell {
                            role,
                            granted: grant_id.is_some(),
                            grant_id,
                        }
                    })
                    .collect();
                MatrixRow { permission, cells }
            })
            .collect();

        Ok(PermissionMatrix {
            roles: Role::ALL.to_vec(),
            rows,
        })
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, RbacError> {
        let counts = policy_store::count_assignments_by_role(&self.db).await?;
        Ok(DashboardStats {
            total_users: policy_store::count_users_with_roles(&self.db).await?,
            active_roles: counts.values().filter(|&&n| n > 0).count() as u64,
            permissions: policy_store::count_permissions(&self.db).await?,
            grants: policy_store::count_grants(&self.db).await?,
            audit_events_last_24h: ledger::count_since(&self.db, now_millis() - DAY_MS).await?,
        })
    }
}
