//! In-memory [`RoleStore`].
//!
//! All state sits behind one `tokio::sync::RwLock`, so every call observes or
//! produces a consistent table. Not durable; used by tests and local runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::store::{RoleStore, StoreResult};
use crate::hierarchy::types::{
    AuditEvent, NewAuditEvent, NewPermission, NewRole, NewUser, Permission, PermissionId, Role,
    RoleId, User, UserId,
};
use crate::hierarchy::Hierarchy;

#[derive(Debug, Default)]
struct MemoryState {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    users: BTreeMap<UserId, User>,
    audit: Vec<AuditEvent>,
    last_role_id: RoleId,
    last_permission_id: PermissionId,
    last_user_id: UserId,
}

impl MemoryState {
    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads records as-is, without any hierarchy validation. Lets tests and
    /// fixtures reproduce corrupt tables (cycles, dangling parents, stale
    /// levels).
    pub async fn import(&self, roles: Vec<Role>, permissions: Vec<Permission>) {
        let mut state = self.state.write().await;
        for permission in permissions {
            state.last_permission_id = state.last_permission_id.max(permission.id);
            state.permissions.insert(permission.id, permission);
        }
        for role in roles {
            state.last_role_id = state.last_role_id.max(role.id);
            state.roles.insert(role.id, role);
        }
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn snapshot(&self) -> StoreResult<Hierarchy> {
        let state = self.state.read().await;
        Ok(Hierarchy::new(
            state.roles.values().cloned(),
            state.permissions.values().cloned(),
        ))
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn list_children(&self, parent_id: RoleId) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .values()
            .filter(|r| r.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn insert_role(&self, role: NewRole) -> StoreResult<Role> {
        let mut state = self.state.write().await;
        if state.role_name_taken(&role.name, None) {
            return Err(HierarchyError::DuplicateName {
                entity: "role",
                name: role.name,
            });
        }
        if let Some(parent_id) = role.parent_id {
            if !state.roles.contains_key(&parent_id) {
                return Err(HierarchyError::ParentNotFound(parent_id));
            }
        }

        state.last_role_id += 1;
        let record = Role {
            id: state.last_role_id,
            name: role.name,
            description: role.description,
            parent_id: role.parent_id,
            level: role.level,
            permissions: BTreeSet::new(),
        };
        state.roles.insert(record.id, record.clone());
        Ok(record)
    }

    async fn save_roles(&self, roles: &[Role]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for role in roles {
            if !state.roles.contains_key(&role.id) {
                return Err(HierarchyError::RoleNotFound(role.id));
            }
            if state.role_name_taken(&role.name, Some(role.id)) {
                return Err(HierarchyError::DuplicateName {
                    entity: "role",
                    name: role.name.clone(),
                });
            }
        }
        for role in roles {
            if let Some(stored) = state.roles.get_mut(&role.id) {
                stored.name = role.name.clone();
                stored.description = role.description.clone();
                stored.parent_id = role.parent_id;
                stored.level = role.level;
            }
        }
        Ok(())
    }

    async fn delete_role(&self, id: RoleId, reparented: &[Role]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&id) {
            return Err(HierarchyError::RoleNotFound(id));
        }
        let users = state.users.values().filter(|u| u.role_id == id).count() as u64;
        if users > 0 {
            return Err(HierarchyError::RoleInUse { role_id: id, users });
        }
        if let Some(missing) = reparented.iter().find(|r| !state.roles.contains_key(&r.id)) {
            return Err(HierarchyError::RoleNotFound(missing.id));
        }

        state.roles.remove(&id);
        for role in reparented {
            if let Some(stored) = state.roles.get_mut(&role.id) {
                stored.parent_id = role.parent_id;
                stored.level = role.level;
            }
        }
        Ok(())
    }

    async fn set_role_permissions(
        &self,
        role_id: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(missing) = permissions
            .iter()
            .find(|id| !state.permissions.contains_key(id))
        {
            return Err(HierarchyError::PermissionNotFound(*missing));
        }
        let role = state
            .roles
            .get_mut(&role_id)
            .ok_or(HierarchyError::RoleNotFound(role_id))?;
        role.permissions = permissions.clone();
        Ok(())
    }

    async fn insert_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        let mut state = self.state.write().await;
        if state.permissions.values().any(|p| p.name == permission.name) {
            return Err(HierarchyError::DuplicateName {
                entity: "permission",
                name: permission.name,
            });
        }
        state.last_permission_id += 1;
        let record = Permission {
            id: state.last_permission_id,
            name: permission.name,
            description: permission.description,
        };
        state.permissions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(HierarchyError::DuplicateName {
                entity: "user",
                name: user.username,
            });
        }
        if !state.roles.contains_key(&user.role_id) {
            return Err(HierarchyError::RoleNotFound(user.role_id));
        }
        state.last_user_id += 1;
        let record = User {
            id: state.last_user_id,
            username: user.username,
            password_hash: user.password_hash,
            role_id: user.role_id,
            status: user.status,
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn list_users(&self, role_id: Option<RoleId>) -> StoreResult<Vec<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .filter(|u| role_id.is_none_or(|id| u.role_id == id))
            .cloned()
            .collect())
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user.id) {
            return Err(HierarchyError::UserNotFound(user.id));
        }
        if !state.roles.contains_key(&user.role_id) {
            return Err(HierarchyError::RoleNotFound(user.role_id));
        }
        if state
            .users
            .values()
            .any(|u| u.username == user.username && u.id != user.id)
        {
            return Err(HierarchyError::DuplicateName {
                entity: "user",
                name: user.username.clone(),
            });
        }
        if let Some(stored) = state.users.get_mut(&user.id) {
            stored.username = user.username.clone();
            stored.role_id = user.role_id;
            stored.status = user.status;
        }
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or(HierarchyError::UserNotFound(id))
    }

    async fn count_users_with_role(&self, role_id: RoleId) -> StoreResult<u64> {
        let state = self.state.read().await;
        Ok(state.users.values().filter(|u| u.role_id == role_id).count() as u64)
    }

    async fn record_audit(&self, event: NewAuditEvent) -> StoreResult<AuditEvent> {
        let mut state = self.state.write().await;
        let record = AuditEvent {
            id: state.audit.len() as i32 + 1,
            action: event.action.to_string(),
            resource: event.resource.to_string(),
            resource_id: event.resource_id,
            details: event.details,
            created_at: Utc::now().timestamp(),
        };
        state.audit.push(record.clone());
        Ok(record)
    }

    async fn list_audit(&self, action: Option<&str>, limit: u64) -> StoreResult<Vec<AuditEvent>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| action.is_none_or(|a| e.action == a))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
