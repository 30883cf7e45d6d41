pub mod cache;
pub mod catalog;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod locks;
pub mod policy_store;
pub mod reconcile;
pub mod types;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, IsolationLevel, TransactionTrait,
};

use cache::PermissionCache;
use coordinator::MutationCoordinator;
use engine::AuthorizationEngine;
use errors::RbacError;
use reconcile::ReconcileReport;
use types::{AuditEvent, AuditFilter};

#[derive(Debug, Clone)]
pub struct RbacOptions {
    /// How long a caller waits for a mutation before getting `Unavailable`
    pub mutation_timeout: Duration,
    pub cache_enabled: bool,
}

impl Default for RbacOptions {
    fn default() -> Self {
        Self {
            mutation_timeout: Duration::from_secs(10),
            cache_enabled: true,
        }
    }
}

/// Entry point bundling the writer, the reader and the audit log over one
/// database. Cheap to clone.
#[derive(Clone)]
pub struct Gatehouse {
    db: DatabaseConnection,
    coordinator: MutationCoordinator,
    engine: AuthorizationEngine,
}

impl Gatehouse {
    pub fn new(db: DatabaseConnection, options: RbacOptions) -> Self {
        let cache = options
            .cache_enabled
            .then(|| Arc::new(PermissionCache::new()));
        Self {
            coordinator: MutationCoordinator::new(
                db.clone(),
                cache.clone(),
                options.mutation_timeout,
            ),
            engine: AuthorizationEngine::new(db.clone(), cache),
            db,
        }
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn query_audit_events(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEvent>, RbacError> {
        ledger::query(&self.db, filter).await
    }

    /// Compare policy state with the audit trail from one consistent snapshot.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RbacError> {
        let txn = match self.db.get_database_backend() {
            DatabaseBackend::Postgres => {
                self.db
                    .begin_with_config(Some(IsolationLevel::RepeatableRead), None)
                    .await?
            }
            _ => self.db.begin().await?,
        };
        let report = reconcile::reconcile(&txn).await;
        txn.rollback().await?;
        report
    }
}
