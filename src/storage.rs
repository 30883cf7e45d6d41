use crate::errors::GatehouseError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use migration::MigratorTrait;
use rand::RngCore;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;

/// Open the connection pool with bounded connect/acquire timeouts so no
/// storage call can wait forever for a connection.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, GatehouseError> {
    let mut opts = ConnectOptions::new(cfg.url.clone());
    opts.max_connections(cfg.max_connections)
        .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .acquire_timeout(Duration::from_millis(cfg.acquire_timeout_ms))
        .sqlx_logging(false);
    let db = Database::connect(opts).await?;
    Ok(db)
}

/// Apply all pending schema migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), GatehouseError> {
    migration::Migrator::up(db, None).await?;
    Ok(())
}

pub fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
