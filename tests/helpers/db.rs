use gatehouse::rbac::types::{AuditAction, AuditFilter, MAX_AUDIT_LIMIT};
use gatehouse::rbac::Gatehouse;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tempfile::NamedTempFile;

use super::builders::PermissionBuilder;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Add a catalog permission named after its resource and action
pub async fn seed_permission(gatehouse: &Gatehouse, resource: &str, action: &str) -> String {
    let id = format!("{action}_{resource}");
    PermissionBuilder::new(&id)
        .resource(resource)
        .action(action)
        .create(gatehouse)
        .await;
    id
}

/// Number of audit events, optionally restricted to one action
pub async fn audit_count(gatehouse: &Gatehouse, action: Option<AuditAction>) -> usize {
    gatehouse
        .query_audit_events(&AuditFilter {
            limit: Some(MAX_AUDIT_LIMIT),
            action,
            ..Default::default()
        })
        .await
        .expect("Failed to query audit events")
        .len()
}
