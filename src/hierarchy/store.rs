//! Storage seam for the role hierarchy.
//!
//! The service never holds store-level locks across calls: it reads a
//! [`Hierarchy`] snapshot, plans a mutation on a clone, and hands the changed
//! records back in a single atomic call.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::types::{
    AuditEvent, NewAuditEvent, NewPermission, NewRole, NewUser, Permission, PermissionId, Role,
    RoleId, User, UserId,
};
use crate::hierarchy::Hierarchy;

pub type StoreResult<T> = Result<T, HierarchyError>;

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Every role with its direct permissions plus the permission catalog,
    /// read at a single point in time.
    async fn snapshot(&self) -> StoreResult<Hierarchy>;

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>>;

    async fn list_children(&self, parent_id: RoleId) -> StoreResult<Vec<Role>>;

    /// Fails with `DuplicateName` or `ParentNotFound`; nothing is written then.
    async fn insert_role(&self, role: NewRole) -> StoreResult<Role>;

    /// Writes name, description, parent and level of every given role in one
    /// transaction. Direct permissions are not touched.
    async fn save_roles(&self, roles: &[Role]) -> StoreResult<()>;

    /// Removes `id` and writes the rewritten children in one transaction.
    /// Fails with `RoleInUse` if any user still references the role.
    async fn delete_role(&self, id: RoleId, reparented: &[Role]) -> StoreResult<()>;

    /// Replaces the direct permission set of a role.
    async fn set_role_permissions(
        &self,
        role_id: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> StoreResult<()>;

    async fn insert_permission(&self, permission: NewPermission) -> StoreResult<Permission>;

    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Users ordered by id, optionally only those assigned to `role_id`.
    async fn list_users(&self, role_id: Option<RoleId>) -> StoreResult<Vec<User>>;

    /// Writes username, role and status. Fails with `UserNotFound`,
    /// `RoleNotFound` or `DuplicateName`; nothing is written then.
    async fn save_user(&self, user: &User) -> StoreResult<()>;

    async fn delete_user(&self, id: UserId) -> StoreResult<()>;

    async fn count_users_with_role(&self, role_id: RoleId) -> StoreResult<u64>;

    async fn record_audit(&self, event: NewAuditEvent) -> StoreResult<AuditEvent>;

    /// Newest first, at most `limit` rows.
    async fn list_audit(&self, action: Option<&str>, limit: u64) -> StoreResult<Vec<AuditEvent>>;
}
