//! Append-only audit ledger.
//!
//! Events are appended inside the caller's transaction and never updated or
//! deleted. `created_at` never decreases in insertion order, and `seq` breaks
//! ties, so `(created_at DESC, seq DESC)` is a total newest-first order.

use std::collections::HashMap;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::entities::audit_event;
use crate::rbac::errors::RbacError;
use crate::rbac::types::{AuditAction, AuditEvent, AuditFilter, NewAuditEvent};
use crate::storage::{now_millis, random_id};

pub async fn append<C: ConnectionTrait>(
    db: &C,
    event: NewAuditEvent,
) -> Result<AuditEvent, RbacError> {
    let newest: Option<i64> = audit_event::Entity::find()
        .select_only()
        .column_as(Expr::col(audit_event::Column::CreatedAt).max(), "newest")
        .into_tuple::<Option<i64>>()
        .one(db)
        .await?
        .flatten();
    let created_at = newest.map_or_else(now_millis, |newest| now_millis().max(newest));

    let details = serde_json::to_string(&event.details)
        .map_err(|e| RbacError::Internal(format!("unserializable audit details: {e}")))?;

    let model = audit_event::ActiveModel {
        seq: NotSet,
        id: Set(random_id()),
        actor_user_id: Set(event.actor_user_id),
        action: Set(event.action.as_str().to_string()),
        resource_type: Set(event.resource_type.to_string()),
        resource_id: Set(event.resource_id),
        details: Set(details),
        created_at: Set(created_at),
    };
    let row = model.insert(db).await?;
    AuditEvent::try_from(row)
}

/// Newest first, at most `filter.effective_limit()` events.
pub async fn query<C: ConnectionTrait>(
    db: &C,
    filter: &AuditFilter,
) -> Result<Vec<AuditEvent>, RbacError> {
    let mut query = audit_event::Entity::find();
    if let Some(before) = filter.before_timestamp {
        query = query.filter(audit_event::Column::CreatedAt.lt(before));
    }
    if let Some(resource_type) = &filter.resource_type {
        query = query.filter(audit_event::Column::ResourceType.eq(resource_type.as_str()));
    }
    if let Some(action) = filter.action {
        query = query.filter(audit_event::Column::Action.eq(action.as_str()));
    }
    if let Some(actor) = &filter.actor {
        query = query.filter(audit_event::Column::ActorUserId.eq(actor.as_str()));
    }

    query
        .order_by_desc(audit_event::Column::CreatedAt)
        .order_by_desc(audit_event::Column::Seq)
        .limit(filter.effective_limit())
        .all(db)
        .await?
        .into_iter()
        .map(AuditEvent::try_from)
        .collect()
}

pub async fn latest_for_resource<C: ConnectionTrait>(
    db: &C,
    resource_type: &str,
    resource_id: &str,
) -> Result<Option<AuditEvent>, RbacError> {
    audit_event::Entity::find()
        .filter(audit_event::Column::ResourceType.eq(resource_type))
        .filter(audit_event::Column::ResourceId.eq(resource_id))
        .order_by_desc(audit_event::Column::CreatedAt)
        .order_by_desc(audit_event::Column::Seq)
        .one(db)
        .await?
        .map(AuditEvent::try_from)
        .transpose()
}

/// Latest recorded action per resource id for one resource type.
pub async fn latest_actions<C: ConnectionTrait>(
    db: &C,
    resource_type: &str,
) -> Result<HashMap<String, AuditAction>, RbacError> {
    let rows: Vec<(Option<String>, String)> = audit_event::Entity::find()
        .select_only()
        .column(audit_event::Column::ResourceId)
        .column(audit_event::Column::Action)
        .filter(audit_event::Column::ResourceType.eq(resource_type))
        .order_by_asc(audit_event::Column::CreatedAt)
        .order_by_asc(audit_event::Column::Seq)
        .into_tuple()
        .all(db)
        .await?;

    let mut latest = HashMap::new();
    for (resource_id, action) in rows {
        let Some(resource_id) = resource_id else {
            continue;
        };
        let action: AuditAction = action.parse().map_err(|_| {
            RbacError::Internal(format!("unknown audit action `{action}` in storage"))
        })?;
        latest.insert(resource_id, action);
    }
    Ok(latest)
}

pub async fn count_since<C: ConnectionTrait>(db: &C, since_ms: i64) -> Result<u64, RbacError> {
    Ok(audit_event::Entity::find()
        .filter(audit_event::Column::CreatedAt.gte(since_ms))
        .count(db)
        .await?)
}
