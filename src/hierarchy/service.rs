//! Hierarchy mutation and query service.
//!
//! Structural writes (create, reparent, delete, level repair, permission
//! assignment) are serialized by `writer` and follow the same shape: take a
//! snapshot, validate, plan the change on a clone of the arena, then commit
//! the changed records with one atomic store call. A failed validation writes
//! nothing. Reads take their own snapshot and never lock.
//!
//! Every committed mutation is followed by an audit record. A failed audit
//! write is logged and does not undo the mutation.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::store::RoleStore;
use crate::hierarchy::types::{
    AuditEvent, CheckMode, CheckRequest, CheckResponse, CreatePermissionRequest,
    CreateRoleRequest, CreateUserRequest, DeleteOutcome, DeletePolicy, EffectivePermissions,
    HierarchyStats, IntegrityReport, NewAuditEvent, NewPermission, NewRole, NewUser, Permission,
    PermissionId, Role, RoleDetail, RoleId, RolePermissionAnalysis, RoleTreeNode,
    UpdateRoleRequest, UpdateUserRequest, User, UserId, UserStatus,
};
use crate::hierarchy::{access, integrity, report, resolver, Hierarchy};
use crate::storage;

const ROLE_NAME_MAX: usize = 50;
const PERMISSION_NAME_MAX: usize = 100;
const USERNAME_MAX: usize = 50;

pub struct HierarchyService {
    store: Arc<dyn RoleStore>,
    writer: Mutex<()>,
    on_delete: DeletePolicy,
}

impl HierarchyService {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
            on_delete: DeletePolicy::default(),
        }
    }

    /// Policy applied by [`Self::delete_role`] when the caller gives none.
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.on_delete = policy;
        self
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.on_delete
    }

    pub async fn snapshot(&self) -> Result<Hierarchy, HierarchyError> {
        self.store.snapshot().await
    }

    async fn audit(
        &self,
        action: &'static str,
        resource: &'static str,
        resource_id: i32,
        details: serde_json::Value,
    ) {
        let event = NewAuditEvent {
            action,
            resource,
            resource_id,
            details,
        };
        if let Err(error) = self.store.record_audit(event).await {
            warn!(action, resource_id, %error, "Failed to record audit event");
        }
    }

    /// Newest first, optionally only one action.
    pub async fn audit_log(
        &self,
        action: Option<&str>,
        limit: u64,
    ) -> Result<Vec<AuditEvent>, HierarchyError> {
        self.store.list_audit(action, limit).await
    }

    // ---------- roles ----------

    pub async fn create_role(&self, req: CreateRoleRequest) -> Result<Role, HierarchyError> {
        let name = validate_name("role", &req.name, ROLE_NAME_MAX)?;

        let _guard = self.writer.lock().await;
        let hierarchy = self.store.snapshot().await?;
        if hierarchy.role_by_name(&name).is_some() {
            return Err(HierarchyError::DuplicateName {
                entity: "role",
                name,
            });
        }
        let level = match req.parent_id {
            Some(parent_id) => {
                hierarchy
                    .find_role(parent_id)
                    .ok_or(HierarchyError::ParentNotFound(parent_id))?
                    .level
                    + 1
            }
            None => 0,
        };

        let role = self
            .store
            .insert_role(NewRole {
                name,
                description: req.description,
                parent_id: req.parent_id,
                level,
            })
            .await?;
        info!(role_id = role.id, parent_id = ?role.parent_id, level, "Created role");
        self.audit(
            "create_role",
            "role",
            role.id,
            json!({ "role_name": role.name, "parent_id": role.parent_id, "level": level }),
        )
        .await;
        Ok(role)
    }

    pub async fn get_role(&self, id: RoleId) -> Result<Role, HierarchyError> {
        self.store
            .get_role(id)
            .await?
            .ok_or(HierarchyError::RoleNotFound(id))
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        Ok(hierarchy.roles().cloned().collect())
    }

    pub async fn list_children(&self, id: RoleId) -> Result<Vec<Role>, HierarchyError> {
        self.get_role(id).await?;
        self.store.list_children(id).await
    }

    /// Renames or redescribes a role. Structure and levels are untouched.
    pub async fn update_role(
        &self,
        id: RoleId,
        req: UpdateRoleRequest,
    ) -> Result<Role, HierarchyError> {
        let _guard = self.writer.lock().await;
        let hierarchy = self.store.snapshot().await?;
        let mut role = hierarchy.role(id)?.clone();

        if let Some(name) = req.name {
            let name = validate_name("role", &name, ROLE_NAME_MAX)?;
            if hierarchy.role_by_name(&name).is_some_and(|r| r.id != id) {
                return Err(HierarchyError::DuplicateName {
                    entity: "role",
                    name,
                });
            }
            role.name = name;
        }
        if let Some(description) = req.description {
            role.description = Some(description);
        }

        self.store.save_roles(std::slice::from_ref(&role)).await?;
        info!(role_id = id, "Updated role");
        self.audit(
            "update_role",
            "role",
            id,
            json!({ "role_name": role.name, "description": role.description }),
        )
        .await;
        Ok(role)
    }

    /// Moves `id` under `parent_id` (or to the root when `None`) and rewrites
    /// the level of the role and of its whole subtree.
    pub async fn set_parent(
        &self,
        id: RoleId,
        parent_id: Option<RoleId>,
    ) -> Result<Role, HierarchyError> {
        let _guard = self.writer.lock().await;
        let hierarchy = self.store.snapshot().await?;
        let old_parent_id = hierarchy.role(id)?.parent_id;

        if let Some(parent_id) = parent_id {
            if parent_id == id {
                return Err(HierarchyError::SelfParent(id));
            }
            hierarchy
                .find_role(parent_id)
                .ok_or(HierarchyError::ParentNotFound(parent_id))?;
            if hierarchy.is_ancestor_of(id, parent_id)? {
                return Err(HierarchyError::CycleWouldForm {
                    role_id: id,
                    parent_id,
                });
            }
        }

        let mut plan = hierarchy;
        plan.reparent(id, parent_id);
        let mut changed = BTreeSet::from([id]);
        changed.extend(plan.recompute_subtree_levels(id)?);

        let records = collect_roles(&plan, &changed)?;
        self.store.save_roles(&records).await?;
        info!(
            role_id = id,
            parent_id = ?parent_id,
            relevelled = changed.len() - 1,
            "Reparented role"
        );
        let role = plan.role(id)?.clone();
        self.audit(
            "update_role_hierarchy",
            "role",
            id,
            json!({
                "role_name": role.name,
                "old_parent_id": old_parent_id,
                "new_parent_id": parent_id,
                "new_level": role.level,
            }),
        )
        .await;
        Ok(role)
    }

    /// Deletes a role. Its children are rewritten according to `policy`
    /// (falling back to the configured default) and their subtrees relevelled
    /// in the same commit.
    pub async fn delete_role(
        &self,
        id: RoleId,
        policy: Option<DeletePolicy>,
    ) -> Result<DeleteOutcome, HierarchyError> {
        let policy = policy.unwrap_or(self.on_delete);

        let _guard = self.writer.lock().await;
        let hierarchy = self.store.snapshot().await?;
        let role = hierarchy.role(id)?.clone();

        let users = self.store.count_users_with_role(id).await?;
        if users > 0 {
            return Err(HierarchyError::RoleInUse { role_id: id, users });
        }

        let new_parent = match policy {
            DeletePolicy::ReparentToGrandparent => role.parent_id,
            DeletePolicy::PromoteToRoot => None,
        };
        let children: Vec<RoleId> = hierarchy.children(id).iter().map(|r| r.id).collect();

        let mut plan = hierarchy;
        plan.remove_role(id);
        let mut changed: BTreeSet<RoleId> = children.iter().copied().collect();
        for child in &children {
            plan.reparent(*child, new_parent);
            changed.extend(plan.recompute_subtree_levels(*child)?);
        }

        let records = collect_roles(&plan, &changed)?;
        self.store.delete_role(id, &records).await?;
        info!(
            role_id = id,
            policy = policy.as_str(),
            reparented = children.len(),
            relevelled = records.len(),
            "Deleted role"
        );
        self.audit(
            "delete_role",
            "role",
            id,
            json!({
                "role_name": role.name,
                "policy": policy.as_str(),
                "reparented": children,
            }),
        )
        .await;
        Ok(DeleteOutcome {
            role,
            policy,
            reparented: children,
        })
    }

    // ---------- structure queries ----------

    pub async fn ancestors(&self, id: RoleId) -> Result<Vec<Role>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        Ok(hierarchy.ancestors(id)?.into_iter().cloned().collect())
    }

    pub async fn descendants(&self, id: RoleId) -> Result<Vec<Role>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        Ok(hierarchy.descendants(id)?.into_iter().cloned().collect())
    }

    pub async fn is_ancestor_of(
        &self,
        ancestor: RoleId,
        role: RoleId,
    ) -> Result<bool, HierarchyError> {
        self.store.snapshot().await?.is_ancestor_of(ancestor, role)
    }

    // ---------- integrity ----------

    pub async fn validate_integrity(&self) -> Result<IntegrityReport, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        let report = integrity::validate(&hierarchy);
        if !report.is_valid {
            warn!(issues = report.issues_count, "Role hierarchy failed integrity check");
            for issue in &report.issues {
                debug!(role_id = issue.role_id, kind = ?issue.kind, "{}", issue.description);
            }
        }
        Ok(report)
    }

    /// Rewrites every stale cached level from the true ancestor chain.
    /// Returns the number of roles changed.
    pub async fn fix_levels(&self) -> Result<usize, HierarchyError> {
        let _guard = self.writer.lock().await;
        let hierarchy = self.store.snapshot().await?;
        let corrections = integrity::level_corrections(&hierarchy);
        if corrections.is_empty() {
            return Ok(0);
        }

        let records = corrections
            .iter()
            .map(|(id, level)| {
                let mut role = hierarchy.role(*id)?.clone();
                role.level = *level;
                Ok(role)
            })
            .collect::<Result<Vec<_>, HierarchyError>>()?;
        self.store.save_roles(&records).await?;
        info!(fixed = records.len(), "Fixed role levels");
        let fixed: Vec<RoleId> = records.iter().map(|r| r.id).collect();
        self.audit("fix_role_levels", "hierarchy", 0, json!({ "role_ids": fixed }))
            .await;
        Ok(records.len())
    }

    // ---------- permissions ----------

    pub async fn create_permission(
        &self,
        req: CreatePermissionRequest,
    ) -> Result<Permission, HierarchyError> {
        let name = validate_name("permission", &req.name, PERMISSION_NAME_MAX)?;
        let permission = self
            .store
            .insert_permission(NewPermission {
                name,
                description: req.description,
            })
            .await?;
        info!(permission_id = permission.id, name = %permission.name, "Created permission");
        self.audit(
            "create_permission",
            "permission",
            permission.id,
            json!({ "name": permission.name }),
        )
        .await;
        Ok(permission)
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        Ok(hierarchy.permissions().cloned().collect())
    }

    pub async fn attach_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<Role, HierarchyError> {
        self.edit_permissions(role_id, |hierarchy, permissions| {
            hierarchy.permission(permission_id)?;
            permissions.insert(permission_id);
            Ok(())
        })
        .await
    }

    /// Descendants lose the permission too, unless another ancestor grants it.
    pub async fn detach_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<Role, HierarchyError> {
        self.edit_permissions(role_id, |hierarchy, permissions| {
            hierarchy.permission(permission_id)?;
            permissions.remove(&permission_id);
            Ok(())
        })
        .await
    }

    /// Replaces the direct permission set. Any unknown id fails the whole call.
    pub async fn set_permissions(
        &self,
        role_id: RoleId,
        permission_ids: Vec<PermissionId>,
    ) -> Result<Role, HierarchyError> {
        self.edit_permissions(role_id, |hierarchy, permissions| {
            for id in &permission_ids {
                hierarchy.permission(*id)?;
            }
            *permissions = permission_ids.iter().copied().collect();
            Ok(())
        })
        .await
    }

    async fn edit_permissions<F>(&self, role_id: RoleId, edit: F) -> Result<Role, HierarchyError>
    where
        F: FnOnce(&Hierarchy, &mut BTreeSet<PermissionId>) -> Result<(), HierarchyError>,
    {
        let _guard = self.writer.lock().await;
        let mut plan = self.store.snapshot().await?;
        let mut permissions = plan.role(role_id)?.permissions.clone();
        edit(&plan, &mut permissions)?;

        self.store
            .set_role_permissions(role_id, &permissions)
            .await?;
        plan.set_permissions(role_id, permissions);
        let role = plan.role(role_id)?.clone();
        info!(
            role_id,
            permissions = role.permissions.len(),
            "Updated role permissions"
        );
        self.audit(
            "update_role_permissions",
            "role",
            role_id,
            json!({ "permission_ids": role.permissions }),
        )
        .await;
        Ok(role)
    }

    // ---------- resolution ----------

    pub async fn all_permissions(&self, role_id: RoleId) -> Result<Vec<Permission>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        Ok(resolver::all_permissions(&hierarchy, role_id)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn has_permission(
        &self,
        role_id: RoleId,
        permission_name: &str,
    ) -> Result<bool, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        resolver::has_permission(&hierarchy, role_id, permission_name)
    }

    pub async fn role_detail(&self, role_id: RoleId) -> Result<RoleDetail, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        report::role_detail(&hierarchy, role_id)
    }

    pub async fn hierarchy_tree(&self) -> Result<Vec<RoleTreeNode>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        report::tree(&hierarchy)
    }

    pub async fn roles_with_permission(
        &self,
        permission_name: &str,
    ) -> Result<Vec<RolePermissionAnalysis>, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        report::roles_with_permission(&hierarchy, permission_name)
    }

    pub async fn effective_permissions_for_user(
        &self,
        user_id: UserId,
    ) -> Result<EffectivePermissions, HierarchyError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(HierarchyError::UserNotFound(user_id))?;
        let hierarchy = self.store.snapshot().await?;
        report::effective_permissions_for_user(&hierarchy, &user)
    }

    pub async fn stats(&self) -> Result<HierarchyStats, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        report::stats(&hierarchy)
    }

    // ---------- access checks ----------

    pub async fn check_all(
        &self,
        role_id: RoleId,
        required: &[String],
    ) -> Result<bool, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        access::check_all(&hierarchy, role_id, required)
    }

    pub async fn check_any(
        &self,
        role_id: RoleId,
        required: &[String],
    ) -> Result<bool, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        access::check_any(&hierarchy, role_id, required)
    }

    /// Runs an AND or OR check against one snapshot and reports what is missing.
    pub async fn check(&self, req: CheckRequest) -> Result<CheckResponse, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        let allowed = match req.mode {
            CheckMode::All => access::check_all(&hierarchy, req.role_id, &req.permissions)?,
            CheckMode::Any => access::check_any(&hierarchy, req.role_id, &req.permissions)?,
        };
        let missing = access::missing_permissions(&hierarchy, req.role_id, &req.permissions)?;
        debug!(role_id = req.role_id, mode = ?req.mode, allowed, "Access check");
        Ok(CheckResponse { allowed, missing })
    }

    pub async fn require_role(
        &self,
        role_id: RoleId,
        role_name: &str,
    ) -> Result<bool, HierarchyError> {
        let hierarchy = self.store.snapshot().await?;
        access::require_role(&hierarchy, role_id, role_name)
    }

    // ---------- users ----------

    pub async fn create_user(&self, req: CreateUserRequest) -> Result<User, HierarchyError> {
        let username = validate_name("user", &req.username, USERNAME_MAX)?;
        if req.password.is_empty() {
            return Err(HierarchyError::Validation(
                "password must not be empty".to_string(),
            ));
        }
        self.get_role(req.role_id).await?;

        let password_hash = storage::hash_password(&req.password)?;
        let user = self
            .store
            .insert_user(NewUser {
                username,
                password_hash,
                role_id: req.role_id,
                status: req.status.unwrap_or_default(),
            })
            .await?;
        info!(user_id = user.id, role_id = user.role_id, "Created user");
        self.audit(
            "create_user",
            "user",
            user.id,
            json!({ "username": user.username, "role_id": user.role_id }),
        )
        .await;
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, HierarchyError> {
        self.store
            .get_user(id)
            .await?
            .ok_or(HierarchyError::UserNotFound(id))
    }

    pub async fn list_users(&self, role_id: Option<RoleId>) -> Result<Vec<User>, HierarchyError> {
        self.store.list_users(role_id).await
    }

    pub async fn list_users_for_role(&self, role_id: RoleId) -> Result<Vec<User>, HierarchyError> {
        self.get_role(role_id).await?;
        self.store.list_users(Some(role_id)).await
    }

    /// Renames, reassigns or changes the status of a user. Moving every user
    /// off a role is what makes that role deletable.
    pub async fn update_user(
        &self,
        id: UserId,
        req: UpdateUserRequest,
    ) -> Result<User, HierarchyError> {
        let username = req
            .username
            .map(|name| validate_name("user", &name, USERNAME_MAX))
            .transpose()?;

        let _guard = self.writer.lock().await;
        let mut user = self.get_user(id).await?;
        let old_role_id = user.role_id;
        if let Some(username) = username {
            user.username = username;
        }
        if let Some(role_id) = req.role_id {
            user.role_id = role_id;
        }
        if let Some(status) = req.status {
            user.status = status;
        }

        self.store.save_user(&user).await?;
        info!(
            user_id = id,
            old_role_id,
            role_id = user.role_id,
            status = %user.status,
            "Updated user"
        );
        self.audit(
            "update_user",
            "user",
            id,
            json!({
                "username": user.username,
                "old_role_id": old_role_id,
                "role_id": user.role_id,
                "status": user.status,
            }),
        )
        .await;
        Ok(user)
    }

    pub async fn update_user_role(
        &self,
        id: UserId,
        role_id: RoleId,
    ) -> Result<User, HierarchyError> {
        self.update_user(
            id,
            UpdateUserRequest {
                role_id: Some(role_id),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn update_user_status(
        &self,
        id: UserId,
        status: UserStatus,
    ) -> Result<User, HierarchyError> {
        self.update_user(
            id,
            UpdateUserRequest {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_user(&self, id: UserId) -> Result<User, HierarchyError> {
        let _guard = self.writer.lock().await;
        let user = self.get_user(id).await?;
        self.store.delete_user(id).await?;
        info!(user_id = id, role_id = user.role_id, "Deleted user");
        self.audit(
            "delete_user",
            "user",
            id,
            json!({ "username": user.username, "role_id": user.role_id }),
        )
        .await;
        Ok(user)
    }
}

fn validate_name(entity: &str, name: &str, max: usize) -> Result<String, HierarchyError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HierarchyError::Validation(format!(
            "{entity} name must not be empty"
        )));
    }
    if name.chars().count() > max {
        return Err(HierarchyError::Validation(format!(
            "{entity} name must be at most {max} characters"
        )));
    }
    Ok(name.to_string())
}

fn collect_roles(
    hierarchy: &Hierarchy,
    ids: &BTreeSet<RoleId>,
) -> Result<Vec<Role>, HierarchyError> {
    ids.iter()
        .map(|id| hierarchy.role(*id).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::hierarchy::memory::MemoryStore;
    use crate::hierarchy::types::SetPermissionsRequest;

    struct Org {
        service: HierarchyService,
        admin: RoleId,
        manager: RoleId,
        user: RoleId,
    }

    async fn role(service: &HierarchyService, name: &str, parent_id: Option<RoleId>) -> Role {
        service
            .create_role(CreateRoleRequest {
                name: name.into(),
                description: None,
                parent_id,
            })
            .await
            .unwrap()
    }

    async fn permission(service: &HierarchyService, name: &str) -> PermissionId {
        service
            .create_permission(CreatePermissionRequest {
                name: name.into(),
                description: None,
            })
            .await
            .unwrap()
            .id
    }

    /// admin{users:write, roles:write} -> manager{users:read} -> user{}, plus
    /// an unassigned roles:delete.
    async fn make_org() -> Org {
        let service = HierarchyService::new(Arc::new(MemoryStore::new()));
        let users_write = permission(&service, "users:write").await;
        let roles_write = permission(&service, "roles:write").await;
        let users_read = permission(&service, "users:read").await;
        permission(&service, "roles:delete").await;

        let admin = role(&service, "admin", None).await.id;
        let manager = role(&service, "manager", Some(admin)).await.id;
        let user = role(&service, "user", Some(manager)).await.id;

        service
            .set_permissions(admin, vec![users_write, roles_write])
            .await
            .unwrap();
        service.attach_permission(manager, users_read).await.unwrap();

        Org {
            service,
            admin,
            manager,
            user,
        }
    }

    async fn levels(service: &HierarchyService) -> BTreeMap<String, i32> {
        service
            .list_roles()
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.name, r.level))
            .collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_role_computes_level() {
        let org = make_org().await;
        let levels = levels(&org.service).await;
        assert_eq!(levels["admin"], 0);
        assert_eq!(levels["manager"], 1);
        assert_eq!(levels["user"], 2);
    }

    #[tokio::test]
    async fn test_create_role_duplicate_name() {
        let org = make_org().await;
        let err = org
            .service
            .create_role(CreateRoleRequest {
                name: "admin".into(),
                description: None,
                parent_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_create_orphan_persists_nothing() {
        let org = make_org().await;
        let err = org
            .service
            .create_role(CreateRoleRequest {
                name: "orphan".into(),
                description: None,
                parent_id: Some(999),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::ParentNotFound(999)));
        assert_eq!(org.service.list_roles().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_create_role_rejects_blank_name() {
        let service = HierarchyService::new(Arc::new(MemoryStore::new()));
        let err = service
            .create_role(CreateRoleRequest {
                name: "   ".into(),
                description: None,
                parent_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_inherited_permissions_and_checks() {
        let org = make_org().await;
        let names: Vec<String> = org
            .service
            .all_permissions(org.user)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, strings(&["roles:write", "users:read", "users:write"]));

        assert!(org
            .service
            .check_all(org.user, &strings(&["users:read", "roles:write"]))
            .await
            .unwrap());
        assert!(!org
            .service
            .check_any(org.user, &strings(&["roles:delete"]))
            .await
            .unwrap());
        assert!(org.service.has_permission(org.user, "users:write").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_parent_to_descendant_fails_and_changes_nothing() {
        let org = make_org().await;
        let before = org.service.list_roles().await.unwrap();

        let err = org
            .service
            .set_parent(org.admin, Some(org.manager))
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::CycleWouldForm { .. }));

        let err = org
            .service
            .set_parent(org.admin, Some(org.user))
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::CycleWouldForm { .. }));

        assert_eq!(org.service.list_roles().await.unwrap(), before);
        assert_eq!(org.service.get_role(org.admin).await.unwrap().level, 0);
    }

    #[tokio::test]
    async fn test_set_parent_self() {
        let org = make_org().await;
        let err = org
            .service
            .set_parent(org.manager, Some(org.manager))
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::SelfParent(_)));
    }

    #[tokio::test]
    async fn test_set_parent_unknown_role() {
        let org = make_org().await;
        let err = org.service.set_parent(404, None).await.unwrap_err();
        assert!(matches!(err, HierarchyError::RoleNotFound(404)));
        let err = org
            .service
            .set_parent(org.user, Some(404))
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::ParentNotFound(404)));
    }

    #[tokio::test]
    async fn test_set_parent_relevels_subtree() {
        let org = make_org().await;
        let auditor = role(&org.service, "auditor", Some(org.user)).await;
        assert_eq!(auditor.level, 3);

        let moved = org.service.set_parent(org.manager, None).await.unwrap();
        assert_eq!(moved.level, 0);
        let levels = levels(&org.service).await;
        assert_eq!(levels["manager"], 0);
        assert_eq!(levels["user"], 1);
        assert_eq!(levels["auditor"], 2);

        // manager no longer inherits from admin
        assert!(!org.service.has_permission(org.user, "users:write").await.unwrap());
        assert!(org.service.validate_integrity().await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_delete_reparents_to_grandparent() {
        let org = make_org().await;
        let outcome = org.service.delete_role(org.manager, None).await.unwrap();
        assert_eq!(outcome.policy, DeletePolicy::ReparentToGrandparent);
        assert_eq!(outcome.reparented, vec![org.user]);

        let user = org.service.get_role(org.user).await.unwrap();
        assert_eq!(user.parent_id, Some(org.admin));
        assert_eq!(user.level, 1);
        assert!(!org.service.has_permission(org.user, "users:read").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_promotes_to_root() {
        let org = make_org().await;
        org.service
            .delete_role(org.manager, Some(DeletePolicy::PromoteToRoot))
            .await
            .unwrap();
        let user = org.service.get_role(org.user).await.unwrap();
        assert_eq!(user.parent_id, None);
        assert_eq!(user.level, 0);
    }

    #[tokio::test]
    async fn test_configured_delete_policy_is_default() {
        let service = HierarchyService::new(Arc::new(MemoryStore::new()))
            .with_delete_policy(DeletePolicy::PromoteToRoot);
        let root = role(&service, "root", None).await;
        let mid = role(&service, "mid", Some(root.id)).await;
        let leaf = role(&service, "leaf", Some(mid.id)).await;

        let outcome = service.delete_role(mid.id, None).await.unwrap();
        assert_eq!(outcome.policy, DeletePolicy::PromoteToRoot);
        assert_eq!(service.get_role(leaf.id).await.unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_delete_role_in_use() {
        let org = make_org().await;
        org.service
            .create_user(CreateUserRequest {
                username: "dave".into(),
                password: "hunter2".into(),
                role_id: org.manager,
                status: None,
            })
            .await
            .unwrap();

        let err = org.service.delete_role(org.manager, None).await.unwrap_err();
        assert!(matches!(err, HierarchyError::RoleInUse { users: 1, .. }));
        assert_eq!(
            org.service.get_role(org.user).await.unwrap().parent_id,
            Some(org.manager)
        );
    }

    #[tokio::test]
    async fn test_fix_levels_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut admin = crate::hierarchy::index::tests::role(1, "admin", None, 0);
        admin.level = 4;
        store
            .import(
                vec![
                    admin,
                    crate::hierarchy::index::tests::role(2, "manager", Some(1), 0),
                    crate::hierarchy::index::tests::role(3, "user", Some(2), 2),
                ],
                vec![],
            )
            .await;
        let service = HierarchyService::new(store);

        let report = service.validate_integrity().await.unwrap();
        assert_eq!(report.issues_count, 2);

        assert_eq!(service.fix_levels().await.unwrap(), 2);
        assert_eq!(service.fix_levels().await.unwrap(), 0);
        assert!(service.validate_integrity().await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_cycle_in_store_is_an_integrity_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .import(
                vec![
                    crate::hierarchy::index::tests::role(1, "a", Some(2), 0),
                    crate::hierarchy::index::tests::role(2, "b", Some(1), 1),
                ],
                vec![],
            )
            .await;
        let service = HierarchyService::new(store);

        let err = service.all_permissions(1).await.unwrap_err();
        assert!(matches!(err, HierarchyError::CycleDetected(_)));
        assert!(err.status().is_server_error());

        // an unknown permission name is an integrity error too, never a denial
        let err = service.has_permission(1, "no:such").await.unwrap_err();
        assert!(matches!(err, HierarchyError::CycleDetected(1)));
        let err = service
            .check_all(1, &["no:such".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::CycleDetected(1)));

        // fix_levels leaves the cycle for an operator to resolve
        assert_eq!(service.fix_levels().await.unwrap(), 0);

        // breaking the cycle by hand repairs it
        service.set_parent(1, None).await.unwrap();
        assert!(service.validate_integrity().await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_set_permissions_unknown_id_changes_nothing() {
        let org = make_org().await;
        let req = SetPermissionsRequest {
            permission_ids: vec![1, 99],
        };
        let err = org
            .service
            .set_permissions(org.user, req.permission_ids)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::PermissionNotFound(99)));
        assert!(org
            .service
            .get_role(org.user)
            .await
            .unwrap()
            .permissions
            .is_empty());
    }

    #[tokio::test]
    async fn test_detach_permission_affects_descendants() {
        let org = make_org().await;
        let snapshot = org.service.snapshot().await.unwrap();
        let users_write = snapshot.permission_by_name("users:write").unwrap().id;

        org.service
            .detach_permission(org.admin, users_write)
            .await
            .unwrap();
        assert!(!org.service.has_permission(org.user, "users:write").await.unwrap());
        assert!(org.service.has_permission(org.user, "roles:write").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_role_name() {
        let org = make_org().await;
        let role = org
            .service
            .update_role(
                org.user,
                UpdateRoleRequest {
                    name: Some("member".into()),
                    description: Some("Regular member".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(role.name, "member");
        assert_eq!(role.level, 2);

        let err = org
            .service
            .update_role(
                org.user,
                UpdateRoleRequest {
                    name: Some("admin".into()),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_require_role_is_exact() {
        let org = make_org().await;
        assert!(org.service.require_role(org.admin, "admin").await.unwrap());
        // inheriting admin's permissions does not make user an admin
        assert!(!org.service.require_role(org.user, "admin").await.unwrap());
        let err = org.service.require_role(404, "admin").await.unwrap_err();
        assert!(matches!(err, HierarchyError::RoleNotFound(404)));
    }

    #[tokio::test]
    async fn test_check_reports_missing() {
        let org = make_org().await;
        let resp = org
            .service
            .check(CheckRequest {
                role_id: org.user,
                permissions: strings(&["users:read", "roles:delete"]),
                mode: CheckMode::Any,
            })
            .await
            .unwrap();
        assert!(resp.allowed);
        assert_eq!(resp.missing, strings(&["roles:delete"]));
    }

    #[tokio::test]
    async fn test_user_effective_permissions() {
        let org = make_org().await;
        let user = org
            .service
            .create_user(CreateUserRequest {
                username: "erin".into(),
                password: "correct horse".into(),
                role_id: org.user,
                status: Some(UserStatus::Inactive),
            })
            .await
            .unwrap();
        assert!(user.password_hash.starts_with("$argon2"));
        assert_eq!(user.status, UserStatus::Inactive);

        let eff = org
            .service
            .effective_permissions_for_user(user.id)
            .await
            .unwrap();
        assert_eq!(eff.permission_count, 3);
        assert_eq!(eff.role_name.as_deref(), Some("user"));

        let err = org
            .service
            .effective_permissions_for_user(404)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::UserNotFound(404)));
    }

    #[tokio::test]
    async fn test_structure_queries() {
        let org = make_org().await;
        let ancestors: Vec<RoleId> = org
            .service
            .ancestors(org.user)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ancestors, vec![org.manager, org.admin]);
        assert_eq!(org.service.descendants(org.admin).await.unwrap().len(), 2);
        assert!(org.service.is_ancestor_of(org.admin, org.user).await.unwrap());
        assert!(!org.service.is_ancestor_of(org.user, org.admin).await.unwrap());
        assert_eq!(org.service.list_children(org.admin).await.unwrap().len(), 1);
    }

    async fn user(service: &HierarchyService, name: &str, role_id: RoleId) -> User {
        service
            .create_user(CreateUserRequest {
                username: name.into(),
                password: "pw".into(),
                role_id,
                status: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reassigned_user_frees_role_for_deletion() {
        let org = make_org().await;
        let dave = user(&org.service, "dave", org.manager).await;
        assert!(org.service.delete_role(org.manager, None).await.is_err());

        let moved = org.service.update_user_role(dave.id, org.admin).await.unwrap();
        assert_eq!(moved.role_id, org.admin);
        assert!(org
            .service
            .list_users_for_role(org.manager)
            .await
            .unwrap()
            .is_empty());

        org.service.delete_role(org.manager, None).await.unwrap();
        assert_eq!(
            org.service.get_role(org.user).await.unwrap().parent_id,
            Some(org.admin)
        );
    }

    #[tokio::test]
    async fn test_update_user_rejects_bad_input_and_keeps_record() {
        let org = make_org().await;
        let dave = user(&org.service, "dave", org.user).await;
        user(&org.service, "erin", org.user).await;

        let err = org.service.update_user_role(dave.id, 404).await.unwrap_err();
        assert!(matches!(err, HierarchyError::RoleNotFound(404)));

        let err = org
            .service
            .update_user(
                dave.id,
                UpdateUserRequest {
                    username: Some("erin".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::DuplicateName { entity: "user", .. }));
        assert_eq!(org.service.get_user(dave.id).await.unwrap(), dave);

        let suspended = org
            .service
            .update_user_status(dave.id, UserStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(suspended.status, UserStatus::Suspended);
        assert_eq!(suspended.role_id, org.user);

        let err = org.service.list_users_for_role(404).await.unwrap_err();
        assert!(matches!(err, HierarchyError::RoleNotFound(404)));
    }

    #[tokio::test]
    async fn test_delete_user() {
        let org = make_org().await;
        let dave = user(&org.service, "dave", org.user).await;

        let deleted = org.service.delete_user(dave.id).await.unwrap();
        assert_eq!(deleted.username, "dave");
        assert!(org.service.list_users(None).await.unwrap().is_empty());

        let err = org.service.delete_user(dave.id).await.unwrap_err();
        assert!(matches!(err, HierarchyError::UserNotFound(_)));
        org.service.delete_role(org.user, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_mutations_are_audited() {
        let org = make_org().await;
        assert_eq!(org.service.audit_log(None, 100).await.unwrap().len(), 9);

        org.service.set_parent(org.user, Some(org.admin)).await.unwrap();
        assert!(org.service.set_parent(org.admin, Some(org.user)).await.is_err());

        let events = org.service.audit_log(None, 100).await.unwrap();
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].action, "update_role_hierarchy");
        assert_eq!(events[0].resource_id, org.user);
        assert_eq!(events[0].details["old_parent_id"], org.manager);
        assert_eq!(events[0].details["new_parent_id"], org.admin);

        let created = org.service.audit_log(Some("create_role"), 100).await.unwrap();
        assert_eq!(created.len(), 3);
    }
}
