pub use sea_orm_migration::prelude::*;

mod m20250301_000001_rbac_schema;
mod m20250301_000002_audit_ledger;
mod m20250302_000001_job_executions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_rbac_schema::Migration),
            Box::new(m20250301_000002_audit_ledger::Migration),
            Box::new(m20250302_000001_job_executions::Migration),
        ]
    }
}
