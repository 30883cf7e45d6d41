pub mod builders;
pub mod db;

pub use builders::{GatehouseBuilder, PermissionBuilder};
pub use db::{audit_count, seed_permission, TestDb};
