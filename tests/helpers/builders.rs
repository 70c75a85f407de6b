use rolegraph::hierarchy::service::HierarchyService;
use rolegraph::hierarchy::types::{
    CreatePermissionRequest, CreateRoleRequest, CreateUserRequest, Permission, Role, RoleId, User,
    UserStatus,
};

/// Builder for creating test roles
pub struct RoleBuilder {
    name: String,
    description: Option<String>,
    parent_id: Option<RoleId>,
    permissions: Vec<String>,
}

impl RoleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            parent_id: None,
            permissions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn child_of(mut self, parent: &Role) -> Self {
        self.parent_id = Some(parent.id);
        self
    }

    /// Grant an existing permission, looked up by name at create time
    pub fn with_permission(mut self, name: &str) -> Self {
        self.permissions.push(name.to_string());
        self
    }

    pub async fn create(self, service: &HierarchyService) -> Role {
        let role = service
            .create_role(CreateRoleRequest {
                name: self.name,
                description: self.description,
                parent_id: self.parent_id,
            })
            .await
            .expect("Failed to create test role");

        if self.permissions.is_empty() {
            return role;
        }

        let snapshot = service.snapshot().await.expect("Failed to load hierarchy");
        let ids = self
            .permissions
            .iter()
            .map(|name| {
                snapshot
                    .permission_by_name(name)
                    .unwrap_or_else(|| panic!("Permission {name} not found"))
                    .id
            })
            .collect();
        service
            .set_permissions(role.id, ids)
            .await
            .expect("Failed to grant permissions")
    }
}

/// Builder for creating test permissions
pub struct PermissionBuilder {
    name: String,
    description: Option<String>,
}

impl PermissionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub async fn create(self, service: &HierarchyService) -> Permission {
        service
            .create_permission(CreatePermissionRequest {
                name: self.name,
                description: self.description,
            })
            .await
            .expect("Failed to create test permission")
    }
}

/// Builder for creating test users
pub struct UserBuilder {
    username: String,
    password: String,
    status: UserStatus,
}

impl UserBuilder {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: "password123".to_string(),
            status: UserStatus::Active,
        }
    }

    pub fn suspended(mut self) -> Self {
        self.status = UserStatus::Suspended;
        self
    }

    pub async fn create(self, service: &HierarchyService, role: &Role) -> User {
        service
            .create_user(CreateUserRequest {
                username: self.username,
                password: self.password,
                role_id: role.id,
                status: Some(self.status),
            })
            .await
            .expect("Failed to create test user")
    }
}

/// Seed the admin -> manager -> user chain used across the integration tests.
///
/// admin{users:write, roles:write} -> manager{users:read} -> user{}, and an
/// unassigned roles:delete.
pub async fn seed_org(service: &HierarchyService) -> (Role, Role, Role) {
    for name in ["users:write", "roles:write", "users:read", "roles:delete"] {
        PermissionBuilder::new(name).create(service).await;
    }
    let admin = RoleBuilder::new("admin")
        .with_description("Full access")
        .with_permission("users:write")
        .with_permission("roles:write")
        .create(service)
        .await;
    let manager = RoleBuilder::new("manager")
        .child_of(&admin)
        .with_permission("users:read")
        .create(service)
        .await;
    let user = RoleBuilder::new("user").child_of(&manager).create(service).await;
    (admin, manager, user)
}
