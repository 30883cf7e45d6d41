//! The only writer of policy state.
//!
//! Each mutation runs on its own task that holds the per-key lock and one
//! database transaction covering both the policy row and its audit event.
//! Callers wait on that task for at most `mutation_timeout`; giving up early
//! never interrupts the task, so the change lands completely or not at all.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionError, TransactionTrait,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::rbac::cache::PermissionCache;
use crate::rbac::errors::RbacError;
use crate::rbac::ledger;
use crate::rbac::locks::{KeyedLocks, LockKey};
use crate::rbac::policy_store::{self, PermissionChange};
use crate::rbac::types::{
    validate_user_id, AuditAction, NewAuditEvent, PermissionDefinition, Role, RoleGrant,
    SyncOutcome, ToggleOutcome, UserRoleAssignment, RESOURCE_PERMISSION, RESOURCE_ROLE_GRANT,
    RESOURCE_USER_ROLE,
};

type TxnFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, RbacError>> + Send + 'c>>;

/// Cache entries made stale by a committed mutation.
#[derive(Debug)]
enum Invalidation {
    None,
    User(String),
    Role(Role),
    All,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    db: DatabaseConnection,
    locks: KeyedLocks,
    /// SQLite allows one writer; queue writers here instead of failing
    /// with SQLITE_BUSY on lock upgrade.
    write_gate: Option<Arc<Mutex<()>>>,
    cache: Option<Arc<PermissionCache>>,
    mutation_timeout: Duration,
}

impl MutationCoordinator {
    pub fn new(
        db: DatabaseConnection,
        cache: Option<Arc<PermissionCache>>,
        mutation_timeout: Duration,
    ) -> Self {
        let write_gate = (db.get_database_backend() == DatabaseBackend::Sqlite)
            .then(|| Arc::new(Mutex::new(())));
        Self {
            db,
            locks: KeyedLocks::new(),
            write_gate,
            cache,
            mutation_timeout,
        }
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Give `target_user` the role `role`.
    pub async fn assign_role(
        &self,
        actor: Option<&str>,
        target_user: &str,
        role: Role,
    ) -> Result<UserRoleAssignment, RbacError> {
        let actor = validate_actor(actor)?;
        validate_user_id(target_user)?;
        let user_id = target_user.to_string();
        let key = LockKey::Assignment {
            user_id: user_id.clone(),
            role,
        };

        let result = self
            .execute(key, move |txn| {
                Box::pin(async move {
                    if policy_store::find_assignment_by_key(txn, &user_id, role)
                        .await?
                        .is_some()
                    {
                        return Err(RbacError::DuplicateAssignment {
                            user_id,
                            role: role.to_string(),
                        });
                    }
                    let assignment =
                        policy_store::insert_assignment(txn, &user_id, role, actor.as_deref())
                            .await?;
                    ledger::append(
                        txn,
                        NewAuditEvent {
                            actor_user_id: actor,
                            action: AuditAction::AssignRole,
                            resource_type: RESOURCE_USER_ROLE,
                            resource_id: Some(assignment.id.clone()),
                            details: json!({ "user_id": user_id, "role": role }),
                        },
                    )
                    .await?;
                    Ok((assignment, Invalidation::User(user_id)))
                })
            })
            .await;

        match &result {
            Ok(a) => info!(assignment_id = %a.id, user_id = %a.user_id, role = %a.role, "Assigned role"),
            Err(e) => warn!(user_id = target_user, role = %role, error = %e, "Role assignment rejected"),
        }
        result
    }

    /// Remove an assignment by id. Returns the removed assignment.
    pub async fn remove_role(
        &self,
        actor: Option<&str>,
        assignment_id: &str,
    ) -> Result<UserRoleAssignment, RbacError> {
        let actor = validate_actor(actor)?;
        validate_id("assignment id", assignment_id)?;
        let current = policy_store::find_assignment(&self.db, assignment_id)
            .await?
            .ok_or_else(|| RbacError::not_found("assignment", assignment_id))?;
        let key = LockKey::Assignment {
            user_id: current.user_id.clone(),
            role: current.role,
        };
        let id = assignment_id.to_string();

        let result = self
            .execute(key, move |txn| {
                Box::pin(async move {
                    // Re-read under the lock; a concurrent removal may have won
                    let assignment = policy_store::find_assignment(txn, &id)
                        .await?
                        .ok_or_else(|| RbacError::not_found("assignment", id.as_str()))?;
                    if !policy_store::delete_assignment(txn, &id).await? {
                        return Err(RbacError::not_found("assignment", id));
                    }
                    ledger::append(
                        txn,
                        NewAuditEvent {
                            actor_user_id: actor,
                            action: AuditAction::RemoveRole,
                            resource_type: RESOURCE_USER_ROLE,
                            resource_id: Some(assignment.id.clone()),
                            details: json!({
                                "user_id": assignment.user_id,
                                "role": assignment.role,
                            }),
                        },
                    )
                    .await?;
                    let invalidation = Invalidation::User(assignment.user_id.clone());
                    Ok((assignment, invalidation))
                })
            })
            .await;

        match &result {
            Ok(a) => info!(assignment_id = %a.id, user_id = %a.user_id, role = %a.role, "Removed role"),
            Err(e) => warn!(assignment_id, error = %e, "Role removal rejected"),
        }
        result
    }

    /// Grant `permission_id` to `role`.
    pub async fn grant_permission(
        &self,
        actor: Option<&str>,
        role: Role,
        permission_id: &str,
    ) -> Result<RoleGrant, RbacError> {
        let actor = validate_actor(actor)?;
        self.require_permission(permission_id).await?;
        let perm_id = permission_id.to_string();
        let key = LockKey::Grant {
            role,
            permission_id: perm_id.clone(),
        };

        let result = self
            .execute(key, move |txn| {
                Box::pin(async move {
                    if policy_store::find_grant_by_key(txn, role, &perm_id)
                        .await?
                        .is_some()
                    {
                        return Err(RbacError::DuplicateGrant {
                            role: role.to_string(),
                            permission_id: perm_id,
                        });
                    }
                    let grant = grant_in(txn, actor, role, &perm_id).await?;
                    Ok((grant, Invalidation::Role(role)))
                })
            })
            .await;

        match &result {
            Ok(g) => info!(grant_id = %g.id, role = %g.role, permission_id = %g.permission_id, "Granted permission"),
            Err(e) => warn!(role = %role, permission_id, error = %e, "Permission grant rejected"),
        }
        result
    }

    /// Revoke a grant by id. Returns the removed grant.
    pub async fn revoke_permission(
        &self,
        actor: Option<&str>,
        grant_id: &str,
    ) -> Result<RoleGrant, RbacError> {
        let actor = validate_actor(actor)?;
        validate_id("grant id", grant_id)?;
        let current = policy_store::find_grant(&self.db, grant_id)
            .await?
            .ok_or_else(|| RbacError::not_found("grant", grant_id))?;
        let key = LockKey::Grant {
            role: current.role,
            permission_id: current.permission_id.clone(),
        };
        let id = grant_id.to_string();

        let result = self
            .execute(key, move |txn| {
                Box::pin(async move {
                    let grant = policy_store::find_grant(txn, &id)
                        .await?
                        .ok_or_else(|| RbacError::not_found("grant", id.as_str()))?;
                    revoke_in(txn, actor, &grant).await?;
                    let invalidation = Invalidation::Role(grant.role);
                    Ok((grant, invalidation))
                })
            })
            .await;

        match &result {
            Ok(g) => info!(grant_id = %g.id, role = %g.role, permission_id = %g.permission_id, "Revoked permission"),
            Err(e) => warn!(grant_id, error = %e, "Permission revoke rejected"),
        }
        result
    }

    /// Flip the (role, permission) cell: revoke the grant if present,
    /// otherwise create it. Concurrent toggles of one cell are serialized,
    /// so the cell always holds exactly one grant or none.
    pub async fn toggle_grant(
        &self,
        actor: Option<&str>,
        role: Role,
        permission_id: &str,
    ) -> Result<ToggleOutcome, RbacError> {
        let actor = validate_actor(actor)?;
        self.require_permission(permission_id).await?;
        let perm_id = permission_id.to_string();
        let key = LockKey::Grant {
            role,
            permission_id: perm_id.clone(),
        };

        let result = self
            .execute(key, move |txn| {
                Box::pin(async move {
                    let outcome = match policy_store::find_grant_by_key(txn, role, &perm_id).await? {
                        Some(grant) => {
                            revoke_in(txn, actor, &grant).await?;
                            ToggleOutcome::Revoked { grant_id: grant.id }
                        }
                        None => {
                            let grant = grant_in(txn, actor, role, &perm_id).await?;
                            ToggleOutcome::Granted { grant_id: grant.id }
                        }
                    };
                    Ok((outcome, Invalidation::Role(role)))
                })
            })
            .await;

        match &result {
            Ok(outcome) => info!(role = %role, permission_id, ?outcome, "Toggled grant"),
            Err(e) => warn!(role = %role, permission_id, error = %e, "Grant toggle rejected"),
        }
        result
    }

    /// Create or update a catalog entry. Unchanged entries record nothing.
    pub async fn sync_permission(
        &self,
        actor: Option<&str>,
        definition: PermissionDefinition,
    ) -> Result<SyncOutcome, RbacError> {
        let actor = validate_actor(actor)?;
        validate_definition(&definition)?;
        let key = LockKey::Permission(definition.id.clone());
        let permission_id = definition.id.clone();

        let result = self
            .execute(key, move |txn| {
                Box::pin(async move {
                    let (outcome, action, details) =
                        match policy_store::upsert_permission(txn, &definition).await? {
                            PermissionChange::Unchanged(_) => {
                                return Ok((SyncOutcome::Unchanged, Invalidation::None));
                            }
                            PermissionChange::Created(after) => (
                                SyncOutcome::Created,
                                AuditAction::CreatePermission,
                                json!({ "after": after }),
                            ),
                            PermissionChange::Updated { before, after } => (
                                SyncOutcome::Updated,
                                AuditAction::UpdatePermission,
                                json!({ "before": before, "after": after }),
                            ),
                        };
                    ledger::append(
                        txn,
                        NewAuditEvent {
                            actor_user_id: actor,
                            action,
                            resource_type: RESOURCE_PERMISSION,
                            resource_id: Some(definition.id.clone()),
                            details,
                        },
                    )
                    .await?;
                    // A changed (resource, action) pair alters every cached answer
                    let invalidation = match outcome {
                        SyncOutcome::Updated => Invalidation::All,
                        _ => Invalidation::None,
                    };
                    Ok((outcome, invalidation))
                })
            })
            .await;

        match &result {
            Ok(SyncOutcome::Unchanged) => {}
            Ok(outcome) => info!(permission_id = %permission_id, ?outcome, "Synced permission"),
            Err(e) => warn!(permission_id = %permission_id, error = %e, "Permission sync rejected"),
        }
        result
    }

    async fn require_permission(&self, permission_id: &str) -> Result<(), RbacError> {
        validate_id("permission id", permission_id)?;
        if policy_store::get_permission(&self.db, permission_id)
            .await?
            .is_none()
        {
            return Err(RbacError::InvalidArgument(format!(
                "unknown permission `{permission_id}`"
            )));
        }
        Ok(())
    }

    /// Run `work` in one transaction on a detached task holding `key`.
    async fn execute<T, F>(&self, key: LockKey, work: F) -> Result<T, RbacError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> TxnFuture<'c, (T, Invalidation)>
            + Send
            + 'static,
    {
        let idempotency_key = key.to_string();
        let db = self.db.clone();
        let locks = self.locks.clone();
        let gate = self.write_gate.clone();
        let cache = self.cache.clone();

        let task = tokio::spawn(async move {
            let _key_guard = locks.lock(key).await;
            let _gate_guard = match gate {
                Some(gate) => Some(gate.lock_owned().await),
                None => None,
            };

            let (value, invalidation) = db
                .transaction::<_, (T, Invalidation), RbacError>(work)
                .await
                .map_err(|e| match e {
                    TransactionError::Connection(db_err) => RbacError::Storage(db_err),
                    TransactionError::Transaction(err) => err,
                })?;

            // Committed; drop stale cache entries before anyone sees the result
            if let Some(cache) = cache {
                match invalidation {
                    Invalidation::None => {}
                    Invalidation::User(user_id) => cache.invalidate_user(&user_id),
                    Invalidation::Role(role) => cache.invalidate_role(role),
                    Invalidation::All => cache.clear(),
                }
            }
            Ok(value)
        });

        match tokio::time::timeout(self.mutation_timeout, task).await {
            Ok(Ok(Err(RbacError::Storage(DbErr::ConnectionAcquire(reason))))) => {
                Err(RbacError::Unavailable {
                    key: idempotency_key,
                    reason: reason.to_string(),
                })
            }
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RbacError::Internal(format!(
                "mutation task for `{idempotency_key}` failed: {join_err}"
            ))),
            Err(_) => {
                warn!(
                    key = %idempotency_key,
                    timeout_ms = self.mutation_timeout.as_millis() as u64,
                    "Mutation did not finish in time; it will still commit or roll back"
                );
                Err(RbacError::Unavailable {
                    key: idempotency_key,
                    reason: format!(
                        "no result within {}ms",
                        self.mutation_timeout.as_millis()
                    ),
                })
            }
        }
    }
}

async fn grant_in(
    txn: &DatabaseTransaction,
    actor: Option<String>,
    role: Role,
    permission_id: &str,
) -> Result<RoleGrant, RbacError> {
    let permission = policy_store::get_permission(txn, permission_id)
        .await?
        .ok_or_else(|| {
            RbacError::InvalidArgument(format!("unknown permission `{permission_id}`"))
        })?;
    let grant = policy_store::insert_grant(txn, role, permission_id, actor.as_deref()).await?;
    ledger::append(
        txn,
        NewAuditEvent {
            actor_user_id: actor,
            action: AuditAction::AddPermission,
            resource_type: RESOURCE_ROLE_GRANT,
            resource_id: Some(grant.id.clone()),
            details: json!({
                "role": role,
                "permission_id": permission.id,
                "permission_name": permission.name,
            }),
        },
    )
    .await?;
    Ok(grant)
}

async fn revoke_in(
    txn: &DatabaseTransaction,
    actor: Option<String>,
    grant: &RoleGrant,
) -> Result<(), RbacError> {
    if !policy_store::delete_grant(txn, &grant.id).await? {
        return Err(RbacError::not_found("grant", grant.id.as_str()));
    }
    ledger::append(
        txn,
        NewAuditEvent {
            actor_user_id: actor,
            action: AuditAction::RemovePermission,
            resource_type: RESOURCE_ROLE_GRANT,
            resource_id: Some(grant.id.clone()),
            details: json!({
                "role": grant.role,
                "permission_id": grant.permission_id,
            }),
        },
    )
    .await?;
    Ok(())
}

fn validate_actor(actor: Option<&str>) -> Result<Option<String>, RbacError> {
    match actor {
        Some(actor) => {
            validate_user_id(actor).map_err(|_| {
                RbacError::InvalidArgument(
                    "actor id must be non-empty and at most 255 bytes".into(),
                )
            })?;
            Ok(Some(actor.to_string()))
        }
        None => Ok(None),
    }
}

fn validate_id(what: &str, id: &str) -> Result<(), RbacError> {
    if id.trim().is_empty() {
        return Err(RbacError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

fn validate_definition(def: &PermissionDefinition) -> Result<(), RbacError> {
    validate_id("permission id", &def.id)?;
    if !def
        .id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(RbacError::InvalidArgument(format!(
            "permission id `{}` must be a lowercase slug",
            def.id
        )));
    }
    validate_id("permission name", &def.name)?;
    validate_id("permission resource", &def.resource)?;
    validate_id("permission action", &def.action)?;
    Ok(())
}
