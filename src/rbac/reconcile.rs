//! Cross-checks policy state against the audit trail.
//!
//! A grant or assignment whose latest audit event is not its creation, or a
//! creation event whose row is gone without a matching removal, means a
//! mutation was applied without its audit record (or the reverse).

use std::collections::{HashMap, HashSet};

use sea_orm::ConnectionTrait;
use serde::Serialize;
use tracing::{error, info};

use crate::rbac::errors::RbacError;
use crate::rbac::types::{AuditAction, RESOURCE_ROLE_GRANT, RESOURCE_USER_ROLE};
use crate::rbac::{ledger, policy_store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub grants_checked: u64,
    pub assignments_checked: u64,
}

impl ReconcileReport {
    pub fn records_checked(&self) -> u64 {
        self.grants_checked + self.assignments_checked
    }
}

/// Fails with `Inconsistent` listing every mismatch found.
pub async fn reconcile<C: ConnectionTrait>(db: &C) -> Result<ReconcileReport, RbacError> {
    let grant_ids: HashSet<String> = policy_store::list_grants(db, None)
        .await?
        .into_iter()
        .map(|g| g.id)
        .collect();
    let assignment_ids: HashSet<String> = policy_store::list_assignments(db, None)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();

    let mut problems = Vec::new();
    compare(
        RESOURCE_ROLE_GRANT,
        &grant_ids,
        &ledger::latest_actions(db, RESOURCE_ROLE_GRANT).await?,
        AuditAction::AddPermission,
        &mut problems,
    );
    compare(
        RESOURCE_USER_ROLE,
        &assignment_ids,
        &ledger::latest_actions(db, RESOURCE_USER_ROLE).await?,
        AuditAction::AssignRole,
        &mut problems,
    );

    if !problems.is_empty() {
        problems.sort();
        for problem in &problems {
            error!(problem = %problem, "Audit trail mismatch");
        }
        return Err(RbacError::Inconsistent(problems.join("; ")));
    }

    let report = ReconcileReport {
        grants_checked: grant_ids.len() as u64,
        assignments_checked: assignment_ids.len() as u64,
    };
    info!(
        grants = report.grants_checked,
        assignments = report.assignments_checked,
        "Audit trail reconciled"
    );
    Ok(report)
}

fn compare(
    resource_type: &str,
    live: &HashSet<String>,
    latest: &HashMap<String, AuditAction>,
    created_by: AuditAction,
    problems: &mut Vec<String>,
) {
    for id in live {
        match latest.get(id) {
            Some(action) if *action == created_by => {}
            Some(action) => problems.push(format!(
                "{resource_type} `{id}` exists but its latest audit event is `{action}`"
            )),
            None => problems.push(format!("{resource_type} `{id}` has no audit event")),
        }
    }
    for (id, action) in latest {
        if *action == created_by && !live.contains(id) {
            problems.push(format!(
                "{resource_type} `{id}` was recorded as `{action}` but does not exist"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_reports_both_directions() {
        let live: HashSet<String> = ["g1", "g2"].into_iter().map(String::from).collect();
        let latest: HashMap<String, AuditAction> = [
            ("g1".to_string(), AuditAction::AddPermission),
            ("g3".to_string(), AuditAction::AddPermission),
            ("g4".to_string(), AuditAction::RemovePermission),
        ]
        .into_iter()
        .collect();

        let mut problems = Vec::new();
        compare(
            RESOURCE_ROLE_GRANT,
            &live,
            &latest,
            AuditAction::AddPermission,
            &mut problems,
        );
        problems.sort();

        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("`g2` has no audit event"));
        assert!(problems[1].contains("`g3` was recorded"));
    }
}
