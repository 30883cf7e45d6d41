// Integration tests for effective permissions and authorization decisions
//
// These tests verify:
// 1. Effective permissions are the union over held roles after any mutation
// 2. Decisions reflect committed mutations immediately (cache on and off)
// 3. Dashboard aggregates, role counts and the permission matrix
// 4. The default catalog seeds idempotently and never re-adds revoked grants

mod helpers;

use std::collections::BTreeSet;

use gatehouse::rbac::catalog::Catalog;
use gatehouse::rbac::types::{AuditAction, AuditFilter, Role, RESOURCE_USER_ROLE};
use gatehouse::rbac::Gatehouse;
use helpers::{audit_count, seed_permission, GatehouseBuilder, PermissionBuilder, TestDb};

async fn permission_ids(gatehouse: &Gatehouse, user: &str) -> BTreeSet<String> {
    gatehouse
        .engine()
        .effective_permissions(user)
        .await
        .expect("effective permissions")
        .iter()
        .map(|p| p.id.clone())
        .collect()
}

/// Union over the user's roles, computed from the raw grant list
async fn expected_ids(gatehouse: &Gatehouse, user: &str) -> BTreeSet<String> {
    let roles = gatehouse.engine().roles_for_user(user).await.unwrap();
    let mut ids = BTreeSet::new();
    for role in roles {
        for grant in gatehouse.engine().list_grants(Some(role)).await.unwrap() {
            ids.insert(grant.permission_id);
        }
    }
    ids
}

async fn run_union_property(gatehouse: Gatehouse) {
    let view_logs = seed_permission(&gatehouse, "logs", "view").await;
    let export = seed_permission(&gatehouse, "data", "export").await;
    let configure = seed_permission(&gatehouse, "devices", "configure").await;
    let coordinator = gatehouse.coordinator();

    let check = |label: &'static str| {
        let gatehouse = gatehouse.clone();
        async move {
            for user in ["u1", "u2"] {
                assert_eq!(
                    permission_ids(&gatehouse, user).await,
                    expected_ids(&gatehouse, user).await,
                    "{label}: {user}"
                );
            }
        }
    };

    check("empty").await;
    let viewer = coordinator.assign_role(None, "u1", Role::Viewer).await.unwrap();
    coordinator.assign_role(None, "u1", Role::Operator).await.unwrap();
    coordinator.assign_role(None, "u2", Role::Operator).await.unwrap();
    check("assigned").await;

    coordinator
        .grant_permission(None, Role::Viewer, &view_logs)
        .await
        .unwrap();
    let operator_export = coordinator
        .grant_permission(None, Role::Operator, &export)
        .await
        .unwrap();
    coordinator
        .grant_permission(None, Role::Operator, &view_logs)
        .await
        .unwrap();
    check("granted").await;
    assert_eq!(
        permission_ids(&gatehouse, "u1").await,
        BTreeSet::from([export.clone(), view_logs.clone()])
    );

    coordinator
        .revoke_permission(None, &operator_export.id)
        .await
        .unwrap();
    check("revoked").await;
    assert!(!permission_ids(&gatehouse, "u2").await.contains(&export));

    coordinator.remove_role(None, &viewer.id).await.unwrap();
    check("removed").await;
    // Still held through operator
    assert!(permission_ids(&gatehouse, "u1").await.contains(&view_logs));

    coordinator
        .toggle_grant(None, Role::Operator, &configure)
        .await
        .unwrap();
    check("toggled").await;
    assert!(gatehouse
        .engine()
        .check("u2", "devices", "configure")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_effective_permissions_are_union_with_cache() {
    let test_db = TestDb::new().await;
    run_union_property(GatehouseBuilder::new().build(test_db.connection())).await;
}

#[tokio::test]
async fn test_effective_permissions_are_union_without_cache() {
    let test_db = TestDb::new().await;
    run_union_property(GatehouseBuilder::new().without_cache().build(test_db.connection())).await;
}

#[tokio::test]
async fn test_operator_view_logs_scenario() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    let view_logs = seed_permission(&gatehouse, "logs", "view").await;
    let topology = seed_permission(&gatehouse, "network_topology", "view").await;
    let coordinator = gatehouse.coordinator();
    let engine = gatehouse.engine();

    coordinator
        .grant_permission(Some("admin"), Role::Operator, &topology)
        .await
        .unwrap();

    // Assign operator to u1: every operator permission is effective
    let assignment = coordinator
        .assign_role(Some("admin"), "u1", Role::Operator)
        .await
        .expect("assign operator");
    let operator_ids: BTreeSet<String> = engine
        .list_grants(Some(Role::Operator))
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.permission_id)
        .collect();
    assert!(permission_ids(&gatehouse, "u1").await.is_superset(&operator_ids));
    // Warm the cache with the pre-grant answer
    assert!(!engine.is_authorized("u1", "logs", "view").await);

    // Grant view_logs: visible immediately, no caching delay
    coordinator
        .grant_permission(Some("admin"), Role::Operator, &view_logs)
        .await
        .unwrap();
    assert!(engine.is_authorized("u1", "logs", "view").await);

    // Remove the assignment: operator-only permissions disappear
    coordinator
        .remove_role(Some("admin"), &assignment.id)
        .await
        .unwrap();
    assert!(permission_ids(&gatehouse, "u1").await.is_empty());
    assert!(!engine.is_authorized("u1", "logs", "view").await);

    let newest = gatehouse
        .query_audit_events(&AuditFilter::with_limit(1))
        .await
        .unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].action, AuditAction::RemoveRole);
    assert_eq!(newest[0].resource_type, RESOURCE_USER_ROLE);
    assert_eq!(newest[0].resource_id.as_deref(), Some(assignment.id.as_str()));
}

#[tokio::test]
async fn test_check_rejects_bad_input_and_is_authorized_fails_closed() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());

    assert!(gatehouse.engine().check("", "logs", "view").await.is_err());
    assert!(!gatehouse.engine().is_authorized("", "logs", "view").await);
    // Unknown (resource, action) pairs are simply not granted
    assert!(!gatehouse
        .engine()
        .check("u1", "nothing", "nowhere")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_is_authorized_denies_when_storage_is_gone() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().without_cache().build(test_db.connection());
    let view_logs = seed_permission(&gatehouse, "logs", "view").await;
    gatehouse
        .coordinator()
        .assign_role(None, "u1", Role::Viewer)
        .await
        .unwrap();
    gatehouse
        .coordinator()
        .grant_permission(None, Role::Viewer, &view_logs)
        .await
        .unwrap();
    assert!(gatehouse.engine().is_authorized("u1", "logs", "view").await);

    test_db.connection().clone().close().await.unwrap();

    assert!(gatehouse.engine().check("u1", "logs", "view").await.is_err());
    assert!(!gatehouse.engine().is_authorized("u1", "logs", "view").await);
}

#[tokio::test]
async fn test_catalog_update_takes_effect_immediately() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    let builder = PermissionBuilder::new("read_logs")
        .resource("logs")
        .action("view");
    let definition = builder.definition();
    builder.create(&gatehouse).await;

    let coordinator = gatehouse.coordinator();
    coordinator.assign_role(None, "u1", Role::Viewer).await.unwrap();
    coordinator
        .grant_permission(None, Role::Viewer, "read_logs")
        .await
        .unwrap();
    assert!(gatehouse.engine().is_authorized("u1", "logs", "view").await);

    let renamed = gatehouse::rbac::types::PermissionDefinition {
        action: "read".to_string(),
        ..definition.clone()
    };
    coordinator
        .sync_permission(Some("admin"), renamed)
        .await
        .unwrap();

    assert!(!gatehouse.engine().is_authorized("u1", "logs", "view").await);
    assert!(gatehouse.engine().is_authorized("u1", "logs", "read").await);
    assert_eq!(audit_count(&gatehouse, Some(AuditAction::UpdatePermission)).await, 1);
}

#[tokio::test]
async fn test_role_counts_and_dashboard_stats() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    let view_logs = seed_permission(&gatehouse, "logs", "view").await;
    let coordinator = gatehouse.coordinator();

    coordinator.assign_role(None, "u1", Role::Operator).await.unwrap();
    coordinator.assign_role(None, "u2", Role::Operator).await.unwrap();
    coordinator.assign_role(None, "u2", Role::Admin).await.unwrap();
    coordinator
        .grant_permission(None, Role::Operator, &view_logs)
        .await
        .unwrap();

    let counts = gatehouse.engine().list_role_assignment_counts().await.unwrap();
    assert_eq!(counts.len(), Role::ALL.len());
    assert_eq!(counts[&Role::Operator], 2);
    assert_eq!(counts[&Role::Admin], 1);
    assert_eq!(counts[&Role::Viewer], 0);

    let summaries = gatehouse.engine().role_summaries().await.unwrap();
    let admin = summaries.iter().find(|s| s.role == Role::Admin).unwrap();
    assert_eq!(admin.display_name, "Administrator");
    assert_eq!(admin.users, 1);

    let stats = gatehouse.engine().dashboard_stats().await.unwrap();
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.active_roles, 2);
    assert_eq!(stats.permissions, 1);
    assert_eq!(stats.grants, 1);
    // catalog entry + three assignments + one grant
    assert_eq!(stats.audit_events_last_24h, 5);
}

#[tokio::test]
async fn test_default_catalog_seeds_once() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    let catalog = Catalog::builtin().unwrap();

    let first = catalog.sync(gatehouse.coordinator()).await.unwrap();
    assert_eq!(first.created, 8);
    assert_eq!(first.grants_added, catalog.grants.len());
    let events = audit_count(&gatehouse, None).await;
    assert_eq!(events, 8 + catalog.grants.len());

    let second = catalog.sync(gatehouse.coordinator()).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, 8);
    assert_eq!(second.grants_added, 0);
    assert_eq!(second.grants_skipped, catalog.grants.len());
    assert_eq!(audit_count(&gatehouse, None).await, events);

    // System-seeded changes carry no actor
    let seeded = gatehouse
        .query_audit_events(&AuditFilter::default())
        .await
        .unwrap();
    assert!(seeded.iter().all(|e| e.actor_user_id.is_none()));

    let matrix = gatehouse.engine().permission_matrix().await.unwrap();
    assert_eq!(matrix.rows.len(), 8);
    assert_eq!(matrix.roles, Role::ALL.to_vec());
    let delete_row = matrix
        .rows
        .iter()
        .find(|r| r.permission.id == "delete_resources")
        .unwrap();
    let granted: Vec<Role> = delete_row
        .cells
        .iter()
        .filter(|c| c.granted)
        .map(|c| c.role)
        .collect();
    assert_eq!(granted, vec![Role::Admin]);
}

#[tokio::test]
async fn test_revoked_seed_grant_survives_restart() {
    let test_db = TestDb::new().await;
    let catalog = Catalog::builtin().unwrap();

    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    catalog.sync(gatehouse.coordinator()).await.unwrap();
    gatehouse
        .coordinator()
        .assign_role(Some("admin"), "u1", Role::Operator)
        .await
        .unwrap();
    let grant = gatehouse
        .engine()
        .list_grants(Some(Role::Operator))
        .await
        .unwrap()
        .into_iter()
        .find(|g| g.permission_id == "view_logs")
        .expect("operator seeded with view_logs");
    gatehouse
        .coordinator()
        .revoke_permission(Some("admin"), &grant.id)
        .await
        .unwrap();
    let events = audit_count(&gatehouse, None).await;

    // A fresh process over the same database syncs again on startup
    let restarted = GatehouseBuilder::new().build(test_db.connection());
    let report = catalog.sync(restarted.coordinator()).await.unwrap();
    assert_eq!(report.grants_added, 0);
    assert_eq!(report.grants_skipped, catalog.grants.len());
    assert_eq!(audit_count(&restarted, None).await, events);

    let operator_grants = restarted
        .engine()
        .list_grants(Some(Role::Operator))
        .await
        .unwrap();
    assert!(operator_grants.iter().all(|g| g.permission_id != "view_logs"));
    assert!(!restarted.engine().check("u1", "logs", "view").await.unwrap());
}

#[tokio::test]
async fn test_new_catalog_permission_gets_its_seed_grants() {
    let test_db = TestDb::new().await;
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    let mut catalog = Catalog::builtin().unwrap();
    catalog.sync(gatehouse.coordinator()).await.unwrap();

    catalog.permissions.push(
        PermissionBuilder::new("upgrade_firmware")
            .resource("firmware")
            .action("upgrade")
            .definition(),
    );
    catalog.grants.push((Role::Admin, "upgrade_firmware".to_string()));

    let report = catalog.sync(gatehouse.coordinator()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.grants_added, 1);
    assert_eq!(report.grants_skipped, catalog.grants.len() - 1);

    gatehouse
        .coordinator()
        .assign_role(Some("admin"), "u1", Role::Admin)
        .await
        .unwrap();
    assert!(gatehouse
        .engine()
        .check("u1", "firmware", "upgrade")
        .await
        .unwrap());
}
