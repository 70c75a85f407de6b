use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::resolver;
use crate::hierarchy::types::RoleId;
use crate::hierarchy::Hierarchy;

/// AND semantics: every required permission must be held. An empty
/// requirement is satisfied.
pub fn check_all<S: AsRef<str>>(
    hierarchy: &Hierarchy,
    role_id: RoleId,
    required: &[S],
) -> Result<bool, HierarchyError> {
    Ok(missing_permissions(hierarchy, role_id, required)?.is_empty())
}

/// OR semantics: at least one required permission must be held. An empty
/// requirement is never satisfied.
pub fn check_any<S: AsRef<str>>(
    hierarchy: &Hierarchy,
    role_id: RoleId,
    required: &[S],
) -> Result<bool, HierarchyError> {
    let held = resolver::permission_names(hierarchy, role_id)?;
    Ok(required
        .iter()
        .any(|p| held.contains(AsRef::<str>::as_ref(p))))
}

/// Required permissions the role does not hold, in request order.
pub fn missing_permissions<S: AsRef<str>>(
    hierarchy: &Hierarchy,
    role_id: RoleId,
    required: &[S],
) -> Result<Vec<String>, HierarchyError> {
    let held = resolver::permission_names(hierarchy, role_id)?;
    Ok(required
        .iter()
        .map(AsRef::<str>::as_ref)
        .filter(|p| !held.contains(*p))
        .map(str::to_string)
        .collect())
}

/// Exact match on the role's own name. The hierarchy grants permissions, not
/// identity: a child of "admin" is not an "admin".
pub fn require_role(
    hierarchy: &Hierarchy,
    role_id: RoleId,
    role_name: &str,
) -> Result<bool, HierarchyError> {
    Ok(hierarchy.role(role_id)?.name == role_name)
}
