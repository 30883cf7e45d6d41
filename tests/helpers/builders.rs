use gatehouse::rbac::types::PermissionDefinition;
use gatehouse::rbac::{Gatehouse, RbacOptions};
use sea_orm::DatabaseConnection;
use std::time::Duration;

/// Builder for a `Gatehouse` over a test database
pub struct GatehouseBuilder {
    options: RbacOptions,
}

impl GatehouseBuilder {
    pub fn new() -> Self {
        Self {
            options: RbacOptions::default(),
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.options.cache_enabled = false;
        self
    }

    pub fn with_mutation_timeout(mut self, timeout: Duration) -> Self {
        self.options.mutation_timeout = timeout;
        self
    }

    pub fn build(self, db: &DatabaseConnection) -> Gatehouse {
        Gatehouse::new(db.clone(), self.options)
    }
}

/// Builder for catalog permissions
pub struct PermissionBuilder {
    definition: PermissionDefinition,
}

impl PermissionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            definition: PermissionDefinition {
                id: id.to_string(),
                name: id.replace('_', " "),
                description: None,
                resource: "resources".to_string(),
                action: id.to_string(),
            },
        }
    }

    pub fn resource(mut self, resource: &str) -> Self {
        self.definition.resource = resource.to_string();
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.definition.action = action.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.definition.name = name.to_string();
        self
    }

    pub fn definition(&self) -> PermissionDefinition {
        self.definition.clone()
    }

    pub async fn create(self, gatehouse: &Gatehouse) {
        gatehouse
            .coordinator()
            .sync_permission(None, self.definition)
            .await
            .expect("Failed to create test permission");
    }
}
