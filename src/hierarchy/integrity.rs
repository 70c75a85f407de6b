//! Read-only integrity scan and level repair planning.

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::types::{IntegrityIssue, IntegrityReport, IssueKind, RoleId};
use crate::hierarchy::Hierarchy;

/// Flags cycles, dangling parent references and cached levels that disagree
/// with the true ancestor chain. Never mutates.
pub fn validate(hierarchy: &Hierarchy) -> IntegrityReport {
    let mut issues = Vec::new();

    for role in hierarchy.roles() {
        match hierarchy.computed_level(role.id) {
            Ok(expected) if expected != role.level => issues.push(IntegrityIssue {
                kind: IssueKind::IncorrectLevel,
                role_id: role.id,
                role_name: role.name.clone(),
                description: format!(
                    "Role level {} doesn't match expected {}",
                    role.level, expected
                ),
                current_level: Some(role.level),
                expected_level: Some(expected),
            }),
            Ok(_) => {}
            Err(HierarchyError::CycleDetected(_)) => issues.push(IntegrityIssue {
                kind: IssueKind::CircularReference,
                role_id: role.id,
                role_name: role.name.clone(),
                description: "Role has circular reference in hierarchy".to_string(),
                current_level: Some(role.level),
                expected_level: None,
            }),
            // Only the role holding the broken pointer is reported; its
            // descendants inherit the problem but are not themselves wrong.
            Err(HierarchyError::DanglingParent { role_id, parent_id }) if role_id == role.id => {
                issues.push(IntegrityIssue {
                    kind: IssueKind::MissingParent,
                    role_id: role.id,
                    role_name: role.name.clone(),
                    description: format!("Parent role {parent_id} does not exist"),
                    current_level: Some(role.level),
                    expected_level: None,
                })
            }
            Err(_) => {}
        }
    }

    let issues_count = issues.len();
    IntegrityReport {
        is_valid: issues.is_empty(),
        issues,
        total_roles: hierarchy.role_count(),
        issues_count,
    }
}

/// `(role, correct level)` for every role whose cached level is stale.
///
/// Roles on a cyclic or dangling chain have no correct level and are skipped;
/// [`validate`] reports them.
pub fn level_corrections(hierarchy: &Hierarchy) -> Vec<(RoleId, i32)> {
    let mut corrections = Vec::new();
    for role in hierarchy.roles() {
        match hierarchy.computed_level(role.id) {
            Ok(expected) if expected != role.level => corrections.push((role.id, expected)),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(role_id = role.id, error = %e, "Skipping level repair for role");
            }
        }
    }
    corrections
}
