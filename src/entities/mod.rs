pub mod audit_event;
pub mod job_execution;
pub mod permission;
pub mod role_grant;
pub mod user_role;

pub use audit_event::Entity as AuditEvent;
pub use job_execution::Entity as JobExecution;
pub use permission::Entity as Permission;
pub use role_grant::Entity as RoleGrant;
pub use user_role::Entity as UserRole;
