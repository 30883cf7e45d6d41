//! Permission catalog and seed grants, declared in KDL:
//!
//! ```kdl
//! permission "view_logs" resource="logs" action="view" {
//!     name "View Logs"
//!     description "Read system logs"
//! }
//! grant "viewer" {
//!     - "view_logs"
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use kdl::KdlDocument;

use crate::errors::GatehouseError;
use crate::rbac::coordinator::MutationCoordinator;
use crate::rbac::policy_store;
use crate::rbac::types::{PermissionDefinition, Role, SyncOutcome};

const DEFAULT_CATALOG: &str = include_str!("catalog/default.kdl");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub permissions: Vec<PermissionDefinition>,
    /// Seed grants: (role, permission id)
    pub grants: Vec<(Role, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub grants_added: usize,
    pub grants_existing: usize,
    /// Seed grants left to the administrators because their permission
    /// already existed.
    pub grants_skipped: usize,
}

impl Catalog {
    /// The catalog shipped with the binary.
    pub fn builtin() -> Result<Self, GatehouseError> {
        parse_catalog(DEFAULT_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, GatehouseError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GatehouseError::Catalog(format!("failed to read `{}`: {e}", path.display()))
        })?;
        let catalog = parse_catalog(&contents)?;
        tracing::info!(
            path = %path.display(),
            permissions = catalog.permissions.len(),
            grants = catalog.grants.len(),
            "Loaded permission catalog"
        );
        Ok(catalog)
    }

    /// Apply through the coordinator as the system actor. Idempotent:
    /// unchanged permissions and existing grants are left alone.
    ///
    /// Seed grants only apply to an empty grant table or to permissions
    /// created by this sync, so grants revoked at runtime stay revoked.
    pub async fn sync(
        &self,
        coordinator: &MutationCoordinator,
    ) -> Result<CatalogSyncReport, GatehouseError> {
        let mut report = CatalogSyncReport::default();
        let fresh_install = policy_store::count_grants(coordinator.db()).await? == 0;
        let mut created = HashSet::new();

        for def in &self.permissions {
            match coordinator.sync_permission(None, def.clone()).await? {
                SyncOutcome::Created => {
                    report.created += 1;
                    created.insert(def.id.clone());
                }
                SyncOutcome::Updated => report.updated += 1,
                SyncOutcome::Unchanged => report.unchanged += 1,
            }
        }

        for (role, permission_id) in &self.grants {
            if !fresh_install && !created.contains(permission_id) {
                report.grants_skipped += 1;
                continue;
            }
            match coordinator
                .grant_permission(None, *role, permission_id)
                .await
            {
                Ok(_) => report.grants_added += 1,
                Err(e) if e.is_duplicate() => report.grants_existing += 1,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            "Catalog sync complete: {} created, {} updated, {} unchanged, {} grants added, {} grants existing, {} grants skipped",
            report.created,
            report.updated,
            report.unchanged,
            report.grants_added,
            report.grants_existing,
            report.grants_skipped
        );
        Ok(report)
    }
}

/// Parse a KDL catalog document.
pub fn parse_catalog(source: &str) -> Result<Catalog, GatehouseError> {
    let doc: KdlDocument = source.parse()?;

    let mut catalog = Catalog::default();
    let mut ids = HashSet::new();
    let mut pairs = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "permission" => {
                let id = first_string_arg(node).ok_or_else(|| {
                    GatehouseError::Catalog(
                        "permission node requires an id argument (e.g. permission \"view_logs\")"
                            .into(),
                    )
                })?;
                let resource = string_prop(node, "resource").ok_or_else(|| {
                    GatehouseError::Catalog(format!(
                        "permission `{id}` missing `resource` property (e.g. resource=\"logs\")"
                    ))
                })?;
                let action = string_prop(node, "action").ok_or_else(|| {
                    GatehouseError::Catalog(format!(
                        "permission `{id}` missing `action` property (e.g. action=\"view\")"
                    ))
                })?;

                let mut name = None;
                let mut description = None;
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "name" => name = first_string_arg(child),
                            "description" => description = first_string_arg(child),
                            other => {
                                return Err(GatehouseError::Catalog(format!(
                                    "unexpected child `{other}` in permission `{id}` (expected `name` or `description`)"
                                )));
                            }
                        }
                    }
                }
                let name = name.ok_or_else(|| {
                    GatehouseError::Catalog(format!("permission `{id}` missing `name` child"))
                })?;

                if !ids.insert(id.clone()) {
                    return Err(GatehouseError::Catalog(format!(
                        "permission `{id}` declared twice"
                    )));
                }
                if !pairs.insert((resource.clone(), action.clone())) {
                    return Err(GatehouseError::Catalog(format!(
                        "permission `{id}`: resource `{resource}` action `{action}` declared twice"
                    )));
                }

                catalog.permissions.push(PermissionDefinition {
                    id,
                    name,
                    description,
                    resource,
                    action,
                });
            }
            "grant" => {
                let role_name = first_string_arg(node).ok_or_else(|| {
                    GatehouseError::Catalog(
                        "grant node requires a role argument (e.g. grant \"viewer\")".into(),
                    )
                })?;
                let role: Role = role_name
                    .parse()
                    .map_err(|e| GatehouseError::Catalog(format!("grant `{role_name}`: {e}")))?;
                for permission_id in dash_list(node) {
                    catalog.grants.push((role, permission_id));
                }
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    for (role, permission_id) in &catalog.grants {
        if !ids.contains(permission_id) {
            return Err(GatehouseError::Catalog(format!(
                "grant `{role}` references unknown permission `{permission_id}`"
            )));
        }
    }

    Ok(catalog)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &kdl::KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Children named "-" whose first argument is a string.
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
