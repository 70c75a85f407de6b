//! Read models composed from a [`Hierarchy`] snapshot.

use std::collections::BTreeMap;

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::resolver;
use crate::hierarchy::types::{
    EffectivePermissions, HierarchyStats, Permission, Role, RoleDetail, RoleId,
    RolePermissionAnalysis, RoleSummary, RoleTreeNode, User,
};
use crate::hierarchy::Hierarchy;

pub fn role_detail(hierarchy: &Hierarchy, role_id: RoleId) -> Result<RoleDetail, HierarchyError> {
    let role = hierarchy.role(role_id)?;
    let all = resolver::effective_permission_ids(hierarchy, role_id)?;
    let inherited = all.difference(&role.permissions).copied().collect();

    let owned = |ps: Vec<&Permission>| ps.into_iter().cloned().collect::<Vec<_>>();

    Ok(RoleDetail {
        id: role.id,
        name: role.name.clone(),
        description: role.description.clone(),
        level: role.level,
        parent_id: role.parent_id,
        parent_name: role
            .parent_id
            .and_then(|p| hierarchy.find_role(p))
            .map(|p| p.name.clone()),
        direct_permissions: owned(resolver::sorted_by_name(hierarchy, &role.permissions)),
        inherited_permissions: owned(resolver::sorted_by_name(hierarchy, &inherited)),
        all_permissions: owned(resolver::sorted_by_name(hierarchy, &all)),
        hierarchy_path: hierarchy
            .hierarchy_path(role_id)?
            .into_iter()
            .map(RoleSummary::from)
            .collect(),
        children: hierarchy
            .children(role_id)
            .into_iter()
            .map(RoleSummary::from)
            .collect(),
    })
}

/// The forest, one tree per root.
pub fn tree(hierarchy: &Hierarchy) -> Result<Vec<RoleTreeNode>, HierarchyError> {
    hierarchy
        .roots()
        .map(|root| tree_node(hierarchy, root))
        .collect()
}

// Roles on a cycle have a parent, so they are never reachable from a root.
fn tree_node(hierarchy: &Hierarchy, role: &Role) -> Result<RoleTreeNode, HierarchyError> {
    let names = |ps: Vec<&Permission>| -> Vec<String> {
        ps.into_iter().map(|p| p.name.clone()).collect()
    };
    Ok(RoleTreeNode {
        id: role.id,
        name: role.name.clone(),
        description: role.description.clone(),
        level: role.level,
        direct_permissions: names(resolver::sorted_by_name(hierarchy, &role.permissions)),
        all_permissions: names(resolver::all_permissions(hierarchy, role.id)?),
        children: hierarchy
            .children(role.id)
            .into_iter()
            .map(|child| tree_node(hierarchy, child))
            .collect::<Result<_, _>>()?,
    })
}

/// Every role holding `permission_name`, directly or through an ancestor.
pub fn roles_with_permission(
    hierarchy: &Hierarchy,
    permission_name: &str,
) -> Result<Vec<RolePermissionAnalysis>, HierarchyError> {
    let Some(permission) = hierarchy.permission_by_name(permission_name) else {
        return Ok(Vec::new());
    };

    let mut result = Vec::new();
    for role in hierarchy.roles() {
        let has_direct = role.permissions.contains(&permission.id);
        let inherited_from = if has_direct {
            None
        } else {
            resolver::permission_source(hierarchy, role.id, permission_name)?
        };
        if !has_direct && inherited_from.is_none() {
            continue;
        }
        result.push(RolePermissionAnalysis {
            id: role.id,
            name: role.name.clone(),
            level: role.level,
            has_direct,
            has_inherited: !has_direct,
            inherited_from: inherited_from.map(str::to_string),
        });
    }
    Ok(result)
}

/// A user without a resolvable role has no permissions.
pub fn effective_permissions_for_user(
    hierarchy: &Hierarchy,
    user: &User,
) -> Result<EffectivePermissions, HierarchyError> {
    let role = hierarchy.find_role(user.role_id);
    let permissions: Vec<String> = match role {
        Some(role) => resolver::permission_names(hierarchy, role.id)?
            .into_iter()
            .collect(),
        None => {
            tracing::warn!(user_id = user.id, role_id = user.role_id, "User references missing role");
            Vec::new()
        }
    };

    Ok(EffectivePermissions {
        user_id: user.id,
        username: user.username.clone(),
        role_id: role.map(|r| r.id),
        role_name: role.map(|r| r.name.clone()),
        role_level: role.map(|r| r.level),
        permission_count: permissions.len(),
        permissions,
    })
}

pub fn stats(hierarchy: &Hierarchy) -> Result<HierarchyStats, HierarchyError> {
    let mut roles_by_level: BTreeMap<i32, usize> = BTreeMap::new();
    let mut permission_distribution: BTreeMap<String, usize> = hierarchy
        .permissions()
        .map(|p| (p.name.clone(), 0))
        .collect();

    for role in hierarchy.roles() {
        *roles_by_level.entry(role.level).or_default() += 1;
        for name in resolver::permission_names(hierarchy, role.id)? {
            *permission_distribution.entry(name).or_default() += 1;
        }
    }

    Ok(HierarchyStats {
        total_roles: hierarchy.role_count(),
        root_roles: hierarchy.roots().count(),
        max_depth: roles_by_level.keys().next_back().copied().unwrap_or(0),
        total_permissions: hierarchy.permissions().count(),
        roles_by_level,
        permission_distribution,
    })
}
