//! Durable policy state: the permission catalog, role grants and user role
//! assignments.
//!
//! Every function is generic over [`ConnectionTrait`] so the coordinator can
//! run it inside the same transaction as the audit append. Mutating
//! functions are crate-private; only the coordinator calls them.

use std::collections::BTreeMap;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
};

use crate::entities::{permission, role_grant, user_role};
use crate::rbac::errors::RbacError;
use crate::rbac::types::{
    Permission, PermissionDefinition, Role, RoleGrant, UserRoleAssignment,
};
use crate::storage::{now_millis, random_id};

/// What [`upsert_permission`] did to the catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionChange {
    Created(Permission),
    Updated { before: Permission, after: Permission },
    Unchanged(Permission),
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn is_foreign_key_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::ForeignKeyConstraintViolation(_)))
}

// ---------- Permissions ----------

pub async fn list_permissions<C: ConnectionTrait>(db: &C) -> Result<Vec<Permission>, RbacError> {
    let rows = permission::Entity::find()
        .order_by_asc(permission::Column::Id)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(Permission::from).collect())
}

pub async fn get_permission<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<Option<Permission>, RbacError> {
    let row = permission::Entity::find_by_id(id.to_string()).one(db).await?;
    Ok(row.map(Permission::from))
}

pub async fn find_permission_by_action<C: ConnectionTrait>(
    db: &C,
    resource: &str,
    action: &str,
) -> Result<Option<Permission>, RbacError> {
    let row = permission::Entity::find()
        .filter(permission::Column::Resource.eq(resource))
        .filter(permission::Column::Action.eq(action))
        .one(db)
        .await?;
    Ok(row.map(Permission::from))
}

pub async fn count_permissions<C: ConnectionTrait>(db: &C) -> Result<u64, RbacError> {
    Ok(permission::Entity::find().count(db).await?)
}

/// Insert a catalog entry or bring an existing one in line with `def`.
pub(crate) async fn upsert_permission<C: ConnectionTrait>(
    db: &C,
    def: &PermissionDefinition,
) -> Result<PermissionChange, RbacError> {
    let now = now_millis();
    let existing = permission::Entity::find_by_id(def.id.clone()).one(db).await?;

    let result = match existing {
        None => {
            let model = permission::ActiveModel {
                id: Set(def.id.clone()),
                name: Set(def.name.clone()),
                description: Set(def.description.clone()),
                resource: Set(def.resource.clone()),
                action: Set(def.action.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            };
            model
                .insert(db)
                .await
                .map(|m| PermissionChange::Created(m.into()))
        }
        Some(row) => {
            let before = Permission::from(row.clone());
            if before.name == def.name
                && before.description == def.description
                && before.resource == def.resource
                && before.action == def.action
            {
                return Ok(PermissionChange::Unchanged(before));
            }
            let mut active = row.into_active_model();
            active.name = Set(def.name.clone());
            active.description = Set(def.description.clone());
            active.resource = Set(def.resource.clone());
            active.action = Set(def.action.clone());
            active.updated_at = Set(now);
            active.update(db).await.map(|m| PermissionChange::Updated {
                before,
                after: m.into(),
            })
        }
    };

    result.map_err(|e| {
        if is_unique_violation(&e) {
            RbacError::InvalidArgument(format!(
                "permission `{}`: resource `{}` action `{}` already belongs to another permission",
                def.id, def.resource, def.action
            ))
        } else {
            e.into()
        }
    })
}

// ---------- Grants ----------

pub async fn list_grants<C: ConnectionTrait>(
    db: &C,
    role: Option<Role>,
) -> Result<Vec<RoleGrant>, RbacError> {
    let mut query = role_grant::Entity::find();
    if let Some(role) = role {
        query = query.filter(role_grant::Column::Role.eq(role.as_str()));
    }
    query
        .order_by_asc(role_grant::Column::Role)
        .order_by_asc(role_grant::Column::PermissionId)
        .all(db)
        .await?
        .into_iter()
        .map(RoleGrant::try_from)
        .collect()
}

pub async fn find_grant<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<Option<RoleGrant>, RbacError> {
    role_grant::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .map(RoleGrant::try_from)
        .transpose()
}

pub async fn find_grant_by_key<C: ConnectionTrait>(
    db: &C,
    role: Role,
    permission_id: &str,
) -> Result<Option<RoleGrant>, RbacError> {
    role_grant::Entity::find()
        .filter(role_grant::Column::Role.eq(role.as_str()))
        .filter(role_grant::Column::PermissionId.eq(permission_id))
        .one(db)
        .await?
        .map(RoleGrant::try_from)
        .transpose()
}

pub async fn count_grants<C: ConnectionTrait>(db: &C) -> Result<u64, RbacError> {
    Ok(role_grant::Entity::find().count(db).await?)
}

/// Fails with `DuplicateGrant` when the unique index rejects the row.
pub(crate) async fn insert_grant<C: ConnectionTrait>(
    db: &C,
    role: Role,
    permission_id: &str,
    created_by: Option<&str>,
) -> Result<RoleGrant, RbacError> {
    let model = role_grant::ActiveModel {
        id: Set(random_id()),
        role: Set(role.as_str().to_string()),
        permission_id: Set(permission_id.to_string()),
        created_by: Set(created_by.map(str::to_string)),
        created_at: Set(now_millis()),
    };
    match model.insert(db).await {
        Ok(row) => RoleGrant::try_from(row),
        Err(e) if is_unique_violation(&e) => Err(RbacError::DuplicateGrant {
            role: role.to_string(),
            permission_id: permission_id.to_string(),
        }),
        Err(e) if is_foreign_key_violation(&e) => Err(RbacError::InvalidArgument(format!(
            "unknown permission `{permission_id}`"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Returns whether a row was removed.
pub(crate) async fn delete_grant<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, RbacError> {
    let res = role_grant::Entity::delete_by_id(id.to_string()).exec(db).await?;
    Ok(res.rows_affected == 1)
}

// ---------- Assignments ----------

pub async fn list_assignments<C: ConnectionTrait>(
    db: &C,
    user_id: Option<&str>,
) -> Result<Vec<UserRoleAssignment>, RbacError> {
    let mut query = user_role::Entity::find();
    if let Some(user_id) = user_id {
        query = query.filter(user_role::Column::UserId.eq(user_id));
    }
    query
        .order_by_asc(user_role::Column::UserId)
        .order_by_asc(user_role::Column::Role)
        .all(db)
        .await?
        .into_iter()
        .map(UserRoleAssignment::try_from)
        .collect()
}

pub async fn find_assignment<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<Option<UserRoleAssignment>, RbacError> {
    user_role::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .map(UserRoleAssignment::try_from)
        .transpose()
}

pub async fn find_assignment_by_key<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    role: Role,
) -> Result<Option<UserRoleAssignment>, RbacError> {
    user_role::Entity::find()
        .filter(user_role::Column::UserId.eq(user_id))
        .filter(user_role::Column::Role.eq(role.as_str()))
        .one(db)
        .await?
        .map(UserRoleAssignment::try_from)
        .transpose()
}

/// Fails with `DuplicateAssignment` when the unique index rejects the row.
pub(crate) async fn insert_assignment<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    role: Role,
    created_by: Option<&str>,
) -> Result<UserRoleAssignment, RbacError> {
    let model = user_role::ActiveModel {
        id: Set(random_id()),
        user_id: Set(user_id.to_string()),
        role: Set(role.as_str().to_string()),
        created_by: Set(created_by.map(str::to_string)),
        created_at: Set(now_millis()),
    };
    match model.insert(db).await {
        Ok(row) => UserRoleAssignment::try_from(row),
        Err(e) if is_unique_violation(&e) => Err(RbacError::DuplicateAssignment {
            user_id: user_id.to_string(),
            role: role.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn delete_assignment<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<bool, RbacError> {
    let res = user_role::Entity::delete_by_id(id.to_string()).exec(db).await?;
    Ok(res.rows_affected == 1)
}

// ---------- Derived reads ----------

pub async fn roles_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> Result<Vec<Role>, RbacError> {
    let mut roles: Vec<Role> = list_assignments(db, Some(user_id))
        .await?
        .into_iter()
        .map(|a| a.role)
        .collect();
    roles.sort();
    roles.dedup();
    Ok(roles)
}

/// Union of the permissions granted to `roles`, sorted by id.
pub async fn permissions_for_roles<C: ConnectionTrait>(
    db: &C,
    roles: &[Role],
) -> Result<Vec<Permission>, RbacError> {
    if roles.is_empty() {
        return Ok(Vec::new());
    }
    let permission_ids: Vec<String> = role_grant::Entity::find()
        .select_only()
        .column(role_grant::Column::PermissionId)
        .filter(role_grant::Column::Role.is_in(roles.iter().map(|r| r.as_str())))
        .distinct()
        .into_tuple()
        .all(db)
        .await?;
    if permission_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = permission::Entity::find()
        .filter(permission::Column::Id.is_in(permission_ids))
        .order_by_asc(permission::Column::Id)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(Permission::from).collect())
}

/// Assignment count per role; every role is present, zero when unassigned.
pub async fn count_assignments_by_role<C: ConnectionTrait>(
    db: &C,
) -> Result<BTreeMap<Role, u64>, RbacError> {
    let rows: Vec<(String, i64)> = user_role::Entity::find()
        .select_only()
        .column(user_role::Column::Role)
        .column_as(Expr::col(user_role::Column::Id).count(), "count")
        .group_by(user_role::Column::Role)
        .into_tuple()
        .all(db)
        .await?;

    let mut counts: BTreeMap<Role, u64> = Role::ALL.into_iter().map(|r| (r, 0)).collect();
    for (role, count) in rows {
        let role: Role = role
            .parse()
            .map_err(|_| RbacError::Internal(format!("unknown role `{role}` in storage")))?;
        counts.insert(role, count.max(0) as u64);
    }
    Ok(counts)
}

/// Number of distinct users holding at least one role.
pub async fn count_users_with_roles<C: ConnectionTrait>(db: &C) -> Result<u64, RbacError> {
    let count: Option<i64> = user_role::Entity::find()
        .select_only()
        .column_as(Expr::col(user_role::Column::UserId).count_distinct(), "count")
        .into_tuple()
        .one(db)
        .await?;
    Ok(count.unwrap_or(0).max(0) as u64)
}
