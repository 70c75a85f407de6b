use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::types::{Permission, PermissionId, Role, RoleId};
use crate::hierarchy::Hierarchy;

impl Hierarchy {
    pub fn new(
        roles: impl IntoIterator<Item = Role>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        let mut hierarchy = Hierarchy {
            permissions: permissions.into_iter().map(|p| (p.id, p)).collect(),
            ..Default::default()
        };
        for role in roles {
            hierarchy.insert_role(role);
        }
        hierarchy
    }

    pub fn role(&self, id: RoleId) -> Result<&Role, HierarchyError> {
        self.roles.get(&id).ok_or(HierarchyError::RoleNotFound(id))
    }

    pub fn find_role(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.name == name)
    }

    /// All roles ordered by id.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Role> {
        self.roles.values().filter(|r| r.parent_id.is_none())
    }

    pub fn permission(&self, id: PermissionId) -> Result<&Permission, HierarchyError> {
        self.permissions
            .get(&id)
            .ok_or(HierarchyError::PermissionNotFound(id))
    }

    pub fn permission_by_name(&self, name: &str) -> Option<&Permission> {
        self.permissions.values().find(|p| p.name == name)
    }

    /// The permission catalog ordered by id.
    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    /// Direct children ordered by id.
    pub fn children(&self, id: RoleId) -> Vec<&Role> {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.roles.get(child))
            .collect()
    }

    /// Walk from `id` towards its root, yielding the role itself first.
    ///
    /// Every step is checked against a visited set: a repeated id yields
    /// `CycleDetected`, a parent id with no record yields `DanglingParent`.
    /// Either error ends the walk.
    pub fn lineage(&self, id: RoleId) -> Result<Lineage<'_>, HierarchyError> {
        self.role(id)?;
        Ok(Lineage {
            hierarchy: self,
            start: id,
            next: Some(id),
            previous: None,
            visited: HashSet::new(),
            done: false,
        })
    }

    /// Ancestors of `id`, immediate parent first and root last.
    pub fn ancestors(&self, id: RoleId) -> Result<Vec<&Role>, HierarchyError> {
        self.lineage(id)?.skip(1).collect()
    }

    /// Root first, ending with the role itself.
    pub fn hierarchy_path(&self, id: RoleId) -> Result<Vec<&Role>, HierarchyError> {
        let mut path: Vec<&Role> = self.lineage(id)?.collect::<Result<_, _>>()?;
        path.reverse();
        Ok(path)
    }

    /// All transitive children of `id` in breadth-first order, so every role
    /// appears after its parent.
    pub fn descendants(&self, id: RoleId) -> Result<Vec<&Role>, HierarchyError> {
        self.role(id)?;
        let mut visited = HashSet::from([id]);
        let mut queue: VecDeque<RoleId> = VecDeque::from([id]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for child in self.children(current) {
                if !visited.insert(child.id) {
                    return Err(HierarchyError::CycleDetected(child.id));
                }
                result.push(child);
                queue.push_back(child.id);
            }
        }

        Ok(result)
    }

    /// True iff `ancestor` appears in the ancestor chain of `role`.
    pub fn is_ancestor_of(&self, ancestor: RoleId, role: RoleId) -> Result<bool, HierarchyError> {
        self.role(ancestor)?;
        for step in self.lineage(role)?.skip(1) {
            if step?.id == ancestor {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Level implied by the true ancestor chain, ignoring the cached value.
    pub fn computed_level(&self, id: RoleId) -> Result<i32, HierarchyError> {
        Ok(self.ancestors(id)?.len() as i32)
    }

    // ---------- arena edits used while planning a mutation ----------

    pub(crate) fn insert_role(&mut self, role: Role) {
        if let Some(parent) = role.parent_id {
            self.children.entry(parent).or_default().insert(role.id);
        }
        self.roles.insert(role.id, role);
    }

    pub(crate) fn remove_role(&mut self, id: RoleId) -> Option<Role> {
        let role = self.roles.remove(&id)?;
        if let Some(parent) = role.parent_id {
            self.detach_child(parent, id);
        }
        Some(role)
    }

    /// Rewrites `parent_id` without validation. Levels are left stale.
    pub(crate) fn reparent(&mut self, id: RoleId, parent_id: Option<RoleId>) {
        let Some(role) = self.roles.get_mut(&id) else {
            return;
        };
        let old = std::mem::replace(&mut role.parent_id, parent_id);
        if let Some(old) = old {
            self.detach_child(old, id);
        }
        if let Some(new) = parent_id {
            self.children.entry(new).or_default().insert(id);
        }
    }

    pub(crate) fn set_level(&mut self, id: RoleId, level: i32) -> bool {
        match self.roles.get_mut(&id) {
            Some(role) if role.level != level => {
                role.level = level;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_permissions(&mut self, id: RoleId, permissions: BTreeSet<PermissionId>) {
        if let Some(role) = self.roles.get_mut(&id) {
            role.permissions = permissions;
        }
    }

    /// Sets `level = parent.level + 1` (or 0 for a root) on `id`, then on every
    /// descendant in breadth-first order. Returns the ids whose level changed.
    pub(crate) fn recompute_subtree_levels(
        &mut self,
        id: RoleId,
    ) -> Result<Vec<RoleId>, HierarchyError> {
        let role = self.role(id)?;
        let level = match role.parent_id {
            Some(parent_id) => {
                let parent = self
                    .roles
                    .get(&parent_id)
                    .ok_or(HierarchyError::DanglingParent {
                        role_id: id,
                        parent_id,
                    })?;
                parent.level + 1
            }
            None => 0,
        };

        let order: Vec<(RoleId, RoleId)> = self
            .descendants(id)?
            .into_iter()
            .filter_map(|r| r.parent_id.map(|p| (r.id, p)))
            .collect();

        let mut changed = Vec::new();
        if self.set_level(id, level) {
            changed.push(id);
        }
        for (child, parent) in order {
            let parent_level = self.role(parent)?.level;
            if self.set_level(child, parent_level + 1) {
                changed.push(child);
            }
        }
        Ok(changed)
    }

    fn detach_child(&mut self, parent: RoleId, child: RoleId) {
        if let Some(set) = self.children.get_mut(&parent) {
            set.remove(&child);
            if set.is_empty() {
                self.children.remove(&parent);
            }
        }
    }
}

/// Iterator returned by [`Hierarchy::lineage`].
pub struct Lineage<'a> {
    hierarchy: &'a Hierarchy,
    start: RoleId,
    next: Option<RoleId>,
    previous: Option<RoleId>,
    visited: HashSet<RoleId>,
    done: bool,
}

impl<'a> Iterator for Lineage<'a> {
    type Item = Result<&'a Role, HierarchyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let id = self.next?;
        if !self.visited.insert(id) {
            self.done = true;
            return Some(Err(HierarchyError::CycleDetected(self.start)));
        }
        match self.hierarchy.roles.get(&id) {
            Some(role) => {
                self.previous = Some(id);
                self.next = role.parent_id;
                Some(Ok(role))
            }
            None => {
                self.done = true;
                Some(Err(HierarchyError::DanglingParent {
                    role_id: self.previous.unwrap_or(self.start),
                    parent_id: id,
                }))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn role(id: RoleId, name: &str, parent: Option<RoleId>, level: i32) -> Role {
        Role {
            id,
            name: name.into(),
            description: None,
            parent_id: parent,
            level,
            permissions: BTreeSet::new(),
        }
    }

    /// admin(1) -> manager(2) -> user(3), plus a lone root auditor(4).
    fn make_chain() -> Hierarchy {
        Hierarchy::new(
            vec![
                role(1, "admin", None, 0),
                role(2, "manager", Some(1), 1),
                role(3, "user", Some(2), 2),
                role(4, "auditor", None, 0),
            ],
            vec![],
        )
    }

    fn ids(roles: &[&Role]) -> Vec<RoleId> {
        roles.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_ancestors_parent_first() {
        let h = make_chain();
        assert_eq!(ids(&h.ancestors(3).unwrap()), vec![2, 1]);
        assert!(h.ancestors(1).unwrap().is_empty());
    }

    #[test]
    fn test_ancestors_unknown_role() {
        let h = make_chain();
        assert!(matches!(
            h.ancestors(99),
            Err(HierarchyError::RoleNotFound(99))
        ));
    }

    #[test]
    fn test_descendants_breadth_first() {
        let mut h = make_chain();
        h.insert_role(role(5, "intern", Some(2), 2));
        assert_eq!(ids(&h.descendants(1).unwrap()), vec![2, 3, 5]);
        assert!(h.descendants(4).unwrap().is_empty());
    }

    #[test]
    fn test_is_ancestor_of() {
        let h = make_chain();
        assert!(h.is_ancestor_of(1, 3).unwrap());
        assert!(h.is_ancestor_of(2, 3).unwrap());
        assert!(!h.is_ancestor_of(3, 1).unwrap());
        assert!(!h.is_ancestor_of(4, 3).unwrap());
        // A role is not its own ancestor.
        assert!(!h.is_ancestor_of(3, 3).unwrap());
    }

    #[test]
    fn test_hierarchy_path_root_first() {
        let h = make_chain();
        assert_eq!(ids(&h.hierarchy_path(3).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_cycle_fails_loudly() {
        // a(1) -> b(2) -> a(1)
        let h = Hierarchy::new(
            vec![role(1, "a", Some(2), 1), role(2, "b", Some(1), 1)],
            vec![],
        );
        assert!(matches!(
            h.ancestors(1),
            Err(HierarchyError::CycleDetected(1))
        ));
        assert!(matches!(
            h.descendants(1),
            Err(HierarchyError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_cycle_above_start_detected() {
        // c(3) hangs below a loop between a(1) and b(2)
        let h = Hierarchy::new(
            vec![
                role(1, "a", Some(2), 1),
                role(2, "b", Some(1), 1),
                role(3, "c", Some(1), 2),
            ],
            vec![],
        );
        assert!(matches!(
            h.ancestors(3),
            Err(HierarchyError::CycleDetected(3))
        ));
    }

    #[test]
    fn test_dangling_parent_reported() {
        let h = Hierarchy::new(
            vec![role(1, "a", Some(77), 1), role(2, "b", Some(1), 2)],
            vec![],
        );
        assert!(matches!(
            h.ancestors(2),
            Err(HierarchyError::DanglingParent {
                role_id: 1,
                parent_id: 77
            })
        ));
    }

    #[test]
    fn test_reparent_updates_child_index() {
        let mut h = make_chain();
        h.reparent(3, Some(4));
        assert!(h.children(2).is_empty());
        assert_eq!(ids(&h.children(4)), vec![3]);
        h.reparent(3, None);
        assert!(h.children(4).is_empty());
        assert_eq!(h.roots().count(), 3);
    }

    #[test]
    fn test_recompute_subtree_levels() {
        let mut h = make_chain();
        h.insert_role(role(5, "intern", Some(3), 3));
        // Move manager under auditor: manager 1->1, user 2->2, intern 3->3 (no change)
        h.reparent(2, Some(4));
        assert!(h.recompute_subtree_levels(2).unwrap().is_empty());

        // Promote manager to root: everything below shifts up by one.
        h.reparent(2, None);
        let mut changed = h.recompute_subtree_levels(2).unwrap();
        changed.sort();
        assert_eq!(changed, vec![2, 3, 5]);
        assert_eq!(h.role(2).unwrap().level, 0);
        assert_eq!(h.role(3).unwrap().level, 1);
        assert_eq!(h.role(5).unwrap().level, 2);
    }

    #[test]
    fn test_remove_role_detaches_from_parent() {
        let mut h = make_chain();
        let removed = h.remove_role(3).unwrap();
        assert_eq!(removed.name, "user");
        assert!(h.children(2).is_empty());
        assert!(h.remove_role(3).is_none());
    }

    #[test]
    fn test_computed_level_ignores_cache() {
        let h = Hierarchy::new(
            vec![role(1, "root", None, 0), role(2, "child", Some(1), 5)],
            vec![],
        );
        assert_eq!(h.computed_level(2).unwrap(), 1);
    }
}
