use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type RoleId = i32;
pub type PermissionId = i32;
pub type UserId = i32;

/// A named capability such as "users:write". Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub description: Option<String>,
}

/// A role record. `parent_id` is a plain id, never an owning reference; the
/// tree is navigated through [`crate::hierarchy::Hierarchy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<RoleId>,
    /// Cached number of edges to the root.
    pub level: i32,
    /// Directly assigned permissions.
    #[serde(rename = "permission_ids")]
    pub permissions: BTreeSet<PermissionId>,
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<RoleId>,
    pub level: i32,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(format!("unknown user status `{other}`")),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a principal to exactly one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: RoleId,
    pub status: UserStatus,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role_id: RoleId,
    pub status: UserStatus,
}

/// A committed change to roles, permissions or users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: i32,
    pub action: String,
    pub resource: String,
    pub resource_id: i32,
    pub details: serde_json::Value,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub action: &'static str,
    pub resource: &'static str,
    pub resource_id: i32,
    pub details: serde_json::Value,
}

/// What happens to the children of a deleted role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Children move up to the deleted role's parent (or become roots).
    #[default]
    ReparentToGrandparent,
    /// Children become roots.
    PromoteToRoot,
}

impl DeletePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletePolicy::ReparentToGrandparent => "reparent_to_grandparent",
            DeletePolicy::PromoteToRoot => "promote_to_root",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub role: Role,
    pub policy: DeletePolicy,
    /// Children whose parent was rewritten.
    pub reparented: Vec<RoleId>,
}

// ---------- Integrity diagnostics ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    CircularReference,
    IncorrectLevel,
    MissingParent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub role_id: RoleId,
    pub role_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_level: Option<i32>,
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.role_name, self.role_id, self.description)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<IntegrityIssue>,
    pub total_roles: usize,
    pub issues_count: usize,
}

// ---------- Read models ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSummary {
    pub id: RoleId,
    pub name: String,
    pub level: i32,
}

impl From<&Role> for RoleSummary {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            level: role.level,
        }
    }
}

/// A role with its hierarchy context: where it sits and what it inherits.
#[derive(Debug, Clone, Serialize)]
pub struct RoleDetail {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub level: i32,
    pub parent_id: Option<RoleId>,
    pub parent_name: Option<String>,
    pub direct_permissions: Vec<Permission>,
    pub inherited_permissions: Vec<Permission>,
    pub all_permissions: Vec<Permission>,
    /// Root first, ending with the role itself.
    pub hierarchy_path: Vec<RoleSummary>,
    pub children: Vec<RoleSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleTreeNode {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub level: i32,
    pub direct_permissions: Vec<String>,
    pub all_permissions: Vec<String>,
    pub children: Vec<RoleTreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolePermissionAnalysis {
    pub id: RoleId,
    pub name: String,
    pub level: i32,
    pub has_direct: bool,
    pub has_inherited: bool,
    /// Nearest ancestor that grants the permission directly.
    pub inherited_from: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectivePermissions {
    pub user_id: UserId,
    pub username: String,
    pub role_id: Option<RoleId>,
    pub role_name: Option<String>,
    pub role_level: Option<i32>,
    pub permissions: Vec<String>,
    pub permission_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyStats {
    pub total_roles: usize,
    pub root_roles: usize,
    pub max_depth: i32,
    pub total_permissions: usize,
    pub roles_by_level: BTreeMap<i32, usize>,
    /// permission name -> number of roles holding it, inherited included
    pub permission_distribution: BTreeMap<String, usize>,
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetParentRequest {
    /// `null` makes the role a root.
    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRoleQuery {
    #[serde(default)]
    pub on_children: Option<DeletePolicy>,
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role_id: RoleId,
    #[serde(default)]
    pub status: Option<UserStatus>,
}

/// Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role_id: Option<RoleId>,
    #[serde(default)]
    pub status: Option<UserStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRoleRequest {
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default)]
    pub role_id: Option<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default = "default_audit_limit")]
    pub limit: u64,
}

fn default_audit_limit() -> u64 {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Every permission is required.
    #[default]
    All,
    /// One permission is enough.
    Any,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub role_id: RoleId,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub mode: CheckMode,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    /// Required permissions the role does not hold.
    pub missing: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequireRoleRequest {
    pub role_id: RoleId,
    pub role_name: String,
}

#[derive(Debug, Serialize)]
pub struct RequireRoleResponse {
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
pub struct FixLevelsResponse {
    pub message: String,
    pub fixed_count: usize,
}
