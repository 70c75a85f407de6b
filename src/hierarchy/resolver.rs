//! Effective permission resolution.
//!
//! A role's effective permissions are its direct permissions unioned with the
//! direct permissions of every ancestor. Nothing is cached: each call walks the
//! current [`Hierarchy`] snapshot, guarded against corrupt chains.

use std::collections::BTreeSet;

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::types::{Permission, PermissionId, RoleId};
use crate::hierarchy::Hierarchy;

/// Ids of every permission `role_id` holds, inherited included.
pub fn effective_permission_ids(
    hierarchy: &Hierarchy,
    role_id: RoleId,
) -> Result<BTreeSet<PermissionId>, HierarchyError> {
    let mut ids = BTreeSet::new();
    for role in hierarchy.lineage(role_id)? {
        ids.extend(role?.permissions.iter().copied());
    }
    Ok(ids)
}

/// Effective permissions sorted by name.
pub fn all_permissions(
    hierarchy: &Hierarchy,
    role_id: RoleId,
) -> Result<Vec<&Permission>, HierarchyError> {
    let ids = effective_permission_ids(hierarchy, role_id)?;
    Ok(sorted_by_name(hierarchy, &ids))
}

pub fn permission_names(
    hierarchy: &Hierarchy,
    role_id: RoleId,
) -> Result<BTreeSet<String>, HierarchyError> {
    Ok(all_permissions(hierarchy, role_id)?
        .into_iter()
        .map(|p| p.name.clone())
        .collect())
}

/// Stops at the first role in the chain that grants `permission_name`. A name
/// missing from the catalog is never held, but the chain is still walked so a
/// corrupt hierarchy surfaces as an error rather than a denial.
pub fn has_permission(
    hierarchy: &Hierarchy,
    role_id: RoleId,
    permission_name: &str,
) -> Result<bool, HierarchyError> {
    let permission = hierarchy.permission_by_name(permission_name).map(|p| p.id);
    for role in hierarchy.lineage(role_id)? {
        let role = role?;
        if permission.is_some_and(|id| role.permissions.contains(&id)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Nearest ancestor (not the role itself) that grants `permission_name` directly.
pub fn permission_source<'a>(
    hierarchy: &'a Hierarchy,
    role_id: RoleId,
    permission_name: &str,
) -> Result<Option<&'a str>, HierarchyError> {
    let permission = hierarchy.permission_by_name(permission_name).map(|p| p.id);
    for role in hierarchy.lineage(role_id)?.skip(1) {
        let role = role?;
        if permission.is_some_and(|id| role.permissions.contains(&id)) {
            return Ok(Some(role.name.as_str()));
        }
    }
    Ok(None)
}

pub(crate) fn sorted_by_name<'a>(
    hierarchy: &'a Hierarchy,
    ids: &BTreeSet<PermissionId>,
) -> Vec<&'a Permission> {
    let mut permissions: Vec<&Permission> = ids
        .iter()
        .filter_map(|id| hierarchy.permission(*id).ok())
        .collect();
    permissions.sort_by(|a, b| a.name.cmp(&b.name));
    permissions
}
