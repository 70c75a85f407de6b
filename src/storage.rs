use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};

use crate::entities;
use crate::errors::AppError;
use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::store::{RoleStore, StoreResult};
use crate::hierarchy::types::{
    AuditEvent, NewAuditEvent, NewPermission, NewRole, NewUser, Permission, PermissionId, Role,
    RoleId, User, UserId, UserStatus,
};
use crate::hierarchy::Hierarchy;
use crate::settings::Database as DbCfg;

/// Connects to the configured database and brings the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AppError> {
    use migration::MigratorTrait;

    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Argon2id hash in PHC string format.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// [`RoleStore`] backed by the relational tables. Every multi-row write runs
/// in one transaction; snapshots are read inside a transaction too.
#[derive(Debug, Clone)]
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn duplicate_or(err: DbErr, entity: &'static str, name: &str) -> HierarchyError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => HierarchyError::DuplicateName {
            entity,
            name: name.to_string(),
        },
        _ => err.into(),
    }
}

fn role_from_model(model: entities::role::Model, permissions: BTreeSet<PermissionId>) -> Role {
    Role {
        id: model.id,
        name: model.name,
        description: model.description,
        parent_id: model.parent_id,
        level: model.level,
        permissions,
    }
}

fn user_from_model(model: entities::user::Model) -> StoreResult<User> {
    let status = model
        .status
        .parse::<UserStatus>()
        .map_err(AppError::Other)?;
    Ok(User {
        id: model.id,
        username: model.username,
        password_hash: model.password_hash,
        role_id: model.role_id,
        status,
    })
}

fn audit_from_model(model: entities::audit_event::Model) -> StoreResult<AuditEvent> {
    let details = match model.details {
        Some(raw) => serde_json::from_str(&raw).map_err(AppError::from)?,
        None => serde_json::Value::Null,
    };
    Ok(AuditEvent {
        id: model.id,
        action: model.action,
        resource: model.resource,
        resource_id: model.resource_id,
        details,
        created_at: model.created_at,
    })
}

async fn role_permission_ids<C: ConnectionTrait>(
    conn: &C,
    role_ids: Option<Vec<RoleId>>,
) -> StoreResult<BTreeMap<RoleId, BTreeSet<PermissionId>>> {
    let mut query = entities::RolePermission::find();
    if let Some(ids) = role_ids {
        query = query.filter(entities::role_permission::Column::RoleId.is_in(ids));
    }
    let mut grouped: BTreeMap<RoleId, BTreeSet<PermissionId>> = BTreeMap::new();
    for row in query.all(conn).await? {
        grouped
            .entry(row.role_id)
            .or_default()
            .insert(row.permission_id);
    }
    Ok(grouped)
}

async fn role_exists<C: ConnectionTrait>(conn: &C, id: RoleId) -> StoreResult<bool> {
    Ok(entities::Role::find_by_id(id).one(conn).await?.is_some())
}

async fn users_with_role<C: ConnectionTrait>(conn: &C, role_id: RoleId) -> StoreResult<u64> {
    Ok(entities::User::find()
        .filter(entities::user::Column::RoleId.eq(role_id))
        .count(conn)
        .await?)
}

async fn write_role<C: ConnectionTrait>(conn: &C, role: &Role, now: i64) -> StoreResult<()> {
    let model = entities::Role::find_by_id(role.id)
        .one(conn)
        .await?
        .ok_or(HierarchyError::RoleNotFound(role.id))?;
    let mut active: entities::role::ActiveModel = model.into();
    active.name = Set(role.name.clone());
    active.description = Set(role.description.clone());
    active.parent_id = Set(role.parent_id);
    active.level = Set(role.level);
    active.updated_at = Set(now);
    active
        .update(conn)
        .await
        .map_err(|e| duplicate_or(e, "role", &role.name))?;
    Ok(())
}

#[async_trait]
impl RoleStore for SqlStore {
    async fn snapshot(&self) -> StoreResult<Hierarchy> {
        let txn = self.db.begin().await?;
        let roles = entities::Role::find()
            .order_by_asc(entities::role::Column::Id)
            .all(&txn)
            .await?;
        let mut grants = role_permission_ids(&txn, None).await?;
        let permissions = entities::Permission::find()
            .order_by_asc(entities::permission::Column::Id)
            .all(&txn)
            .await?;
        txn.commit().await?;

        let roles = roles.into_iter().map(|model| {
            let ids = grants.remove(&model.id).unwrap_or_default();
            role_from_model(model, ids)
        });
        let permissions = permissions.into_iter().map(|model| Permission {
            id: model.id,
            name: model.name,
            description: model.description,
        });
        Ok(Hierarchy::new(roles, permissions))
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let Some(model) = entities::Role::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut grants = role_permission_ids(&self.db, Some(vec![id])).await?;
        let ids = grants.remove(&id).unwrap_or_default();
        Ok(Some(role_from_model(model, ids)))
    }

    async fn list_children(&self, parent_id: RoleId) -> StoreResult<Vec<Role>> {
        let models = entities::Role::find()
            .filter(entities::role::Column::ParentId.eq(parent_id))
            .order_by_asc(entities::role::Column::Id)
            .all(&self.db)
            .await?;
        let ids = models.iter().map(|m| m.id).collect();
        let mut grants = role_permission_ids(&self.db, Some(ids)).await?;
        Ok(models
            .into_iter()
            .map(|model| {
                let ids = grants.remove(&model.id).unwrap_or_default();
                role_from_model(model, ids)
            })
            .collect())
    }

    async fn insert_role(&self, role: NewRole) -> StoreResult<Role> {
        let txn = self.db.begin().await?;
        if let Some(parent_id) = role.parent_id {
            if !role_exists(&txn, parent_id).await? {
                return Err(HierarchyError::ParentNotFound(parent_id));
            }
        }

        let now = Utc::now().timestamp();
        let model = entities::role::ActiveModel {
            name: Set(role.name.clone()),
            description: Set(role.description),
            parent_id: Set(role.parent_id),
            level: Set(role.level),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| duplicate_or(e, "role", &role.name))?;
        txn.commit().await?;

        Ok(role_from_model(model, BTreeSet::new()))
    }

    async fn save_roles(&self, roles: &[Role]) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        let now = Utc::now().timestamp();
        for role in roles {
            write_role(&txn, role, now).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn delete_role(&self, id: RoleId, reparented: &[Role]) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        if !role_exists(&txn, id).await? {
            return Err(HierarchyError::RoleNotFound(id));
        }
        let users = users_with_role(&txn, id).await?;
        if users > 0 {
            return Err(HierarchyError::RoleInUse { role_id: id, users });
        }

        let now = Utc::now().timestamp();
        for role in reparented {
            write_role(&txn, role, now).await?;
        }
        entities::RolePermission::delete_many()
            .filter(entities::role_permission::Column::RoleId.eq(id))
            .exec(&txn)
            .await?;
        entities::Role::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn set_role_permissions(
        &self,
        role_id: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        if !role_exists(&txn, role_id).await? {
            return Err(HierarchyError::RoleNotFound(role_id));
        }
        let known: BTreeSet<PermissionId> = entities::Permission::find()
            .filter(entities::permission::Column::Id.is_in(permissions.iter().copied()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if let Some(missing) = permissions.difference(&known).next() {
            return Err(HierarchyError::PermissionNotFound(*missing));
        }

        entities::RolePermission::delete_many()
            .filter(entities::role_permission::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        if !permissions.is_empty() {
            let rows = permissions
                .iter()
                .map(|permission_id| entities::role_permission::ActiveModel {
                    role_id: Set(role_id),
                    permission_id: Set(*permission_id),
                });
            entities::RolePermission::insert_many(rows).exec(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn insert_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        let model = entities::permission::ActiveModel {
            name: Set(permission.name.clone()),
            description: Set(permission.description),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|e| duplicate_or(e, "permission", &permission.name))?;

        Ok(Permission {
            id: model.id,
            name: model.name,
            description: model.description,
        })
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let txn = self.db.begin().await?;
        if !role_exists(&txn, user.role_id).await? {
            return Err(HierarchyError::RoleNotFound(user.role_id));
        }
        let model = entities::user::ActiveModel {
            username: Set(user.username.clone()),
            password_hash: Set(user.password_hash),
            role_id: Set(user.role_id),
            status: Set(user.status.as_str().to_string()),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| duplicate_or(e, "user", &user.username))?;
        txn.commit().await?;

        user_from_model(model)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        entities::User::find_by_id(id)
            .one(&self.db)
            .await?
            .map(user_from_model)
            .transpose()
    }

    async fn list_users(&self, role_id: Option<RoleId>) -> StoreResult<Vec<User>> {
        let mut query = entities::User::find().order_by_asc(entities::user::Column::Id);
        if let Some(role_id) = role_id {
            query = query.filter(entities::user::Column::RoleId.eq(role_id));
        }
        query
            .all(&self.db)
            .await?
            .into_iter()
            .map(user_from_model)
            .collect()
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        let model = entities::User::find_by_id(user.id)
            .one(&txn)
            .await?
            .ok_or(HierarchyError::UserNotFound(user.id))?;
        if !role_exists(&txn, user.role_id).await? {
            return Err(HierarchyError::RoleNotFound(user.role_id));
        }
        let mut active: entities::user::ActiveModel = model.into();
        active.username = Set(user.username.clone());
        active.role_id = Set(user.role_id);
        active.status = Set(user.status.as_str().to_string());
        active
            .update(&txn)
            .await
            .map_err(|e| duplicate_or(e, "user", &user.username))?;
        txn.commit().await?;
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let result = entities::User::delete_by_id(id).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(HierarchyError::UserNotFound(id));
        }
        Ok(())
    }

    async fn count_users_with_role(&self, role_id: RoleId) -> StoreResult<u64> {
        users_with_role(&self.db, role_id).await
    }

    async fn record_audit(&self, event: NewAuditEvent) -> StoreResult<AuditEvent> {
        let details = serde_json::to_string(&event.details).map_err(AppError::from)?;
        let model = entities::audit_event::ActiveModel {
            action: Set(event.action.to_string()),
            resource: Set(event.resource.to_string()),
            resource_id: Set(event.resource_id),
            details: Set(Some(details)),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        audit_from_model(model)
    }

    async fn list_audit(&self, action: Option<&str>, limit: u64) -> StoreResult<Vec<AuditEvent>> {
        let mut query = entities::AuditEvent::find()
            .order_by_desc(entities::audit_event::Column::Id)
            .limit(limit);
        if let Some(action) = action {
            query = query.filter(entities::audit_event::Column::Action.eq(action));
        }
        query
            .all(&self.db)
            .await?
            .into_iter()
            .map(audit_from_model)
            .collect()
    }
}
