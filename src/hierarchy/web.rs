//! JSON routes over [`HierarchyService`].
//!
//! Body, path and query extractors reject with [`HierarchyError`], so a
//! malformed request gets the same `{"error", "message"}` body as a failed
//! operation.

use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};

use crate::hierarchy::errors::HierarchyError;
use crate::hierarchy::service::HierarchyService;
use crate::hierarchy::types::{
    AuditQuery, CheckRequest, CreatePermissionRequest, CreateRoleRequest, CreateUserRequest,
    DeleteRoleQuery, FixLevelsResponse, ListUsersQuery, PermissionId, RequireRoleRequest,
    RequireRoleResponse, RoleId, SetParentRequest, SetPermissionsRequest, UpdateRoleRequest,
    UpdateUserRequest, UpdateUserRoleRequest, UpdateUserStatusRequest, UserId,
};

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(HierarchyError))]
struct JsonBody<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(HierarchyError))]
struct PathParam<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(HierarchyError))]
struct QueryParams<T>(T);

pub fn router(service: Arc<HierarchyService>) -> Router {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/{id}",
            get(role_detail).patch(update_role).delete(delete_role),
        )
        .route("/roles/{id}/parent", put(set_parent))
        .route("/roles/{id}/children", get(list_children))
        .route("/roles/{id}/users", get(list_role_users))
        .route("/roles/{id}/permissions", put(set_permissions))
        .route(
            "/roles/{id}/permissions/{permission_id}",
            post(attach_permission).delete(detach_permission),
        )
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/{id}/role", put(update_user_role))
        .route("/users/{id}/status", patch(update_user_status))
        .route("/hierarchy/tree", get(hierarchy_tree))
        .route("/hierarchy/validate", get(validate_hierarchy))
        .route("/hierarchy/fix-levels", post(fix_levels))
        .route("/hierarchy/stats", get(hierarchy_stats))
        .route("/hierarchy/permission/{name}", get(roles_with_permission))
        .route("/hierarchy/user/{user_id}/permissions", get(user_permissions))
        .route("/audit", get(audit_log))
        .route("/access/check", post(check_access))
        .route("/access/require-role", post(require_role))
        .route("/healthz", get(health))
        .with_state(service)
}

type Service = State<Arc<HierarchyService>>;

async fn list_roles(State(service): Service) -> impl IntoResponse {
    match service.list_roles().await {
        Ok(roles) => Json(roles).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_role(
    State(service): Service,
    JsonBody(req): JsonBody<CreateRoleRequest>,
) -> impl IntoResponse {
    match service.create_role(req).await {
        Ok(role) => (StatusCode::CREATED, Json(role)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn role_detail(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
) -> impl IntoResponse {
    match service.role_detail(id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_role(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
    JsonBody(req): JsonBody<UpdateRoleRequest>,
) -> impl IntoResponse {
    match service.update_role(id, req).await {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_role(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
    QueryParams(query): QueryParams<DeleteRoleQuery>,
) -> impl IntoResponse {
    match service.delete_role(id, query.on_children).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn set_parent(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
    JsonBody(req): JsonBody<SetParentRequest>,
) -> impl IntoResponse {
    match service.set_parent(id, req.parent_id).await {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_children(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
) -> impl IntoResponse {
    match service.list_children(id).await {
        Ok(children) => Json(children).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn set_permissions(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
    JsonBody(req): JsonBody<SetPermissionsRequest>,
) -> impl IntoResponse {
    match service.set_permissions(id, req.permission_ids).await {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn attach_permission(
    State(service): Service,
    PathParam((id, permission_id)): PathParam<(RoleId, PermissionId)>,
) -> impl IntoResponse {
    match service.attach_permission(id, permission_id).await {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn detach_permission(
    State(service): Service,
    PathParam((id, permission_id)): PathParam<(RoleId, PermissionId)>,
) -> impl IntoResponse {
    match service.detach_permission(id, permission_id).await {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_permissions(State(service): Service) -> impl IntoResponse {
    match service.list_permissions().await {
        Ok(permissions) => Json(permissions).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_permission(
    State(service): Service,
    JsonBody(req): JsonBody<CreatePermissionRequest>,
) -> impl IntoResponse {
    match service.create_permission(req).await {
        Ok(permission) => (StatusCode::CREATED, Json(permission)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_user(
    State(service): Service,
    JsonBody(req): JsonBody<CreateUserRequest>,
) -> impl IntoResponse {
    match service.create_user(req).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_role_users(
    State(service): Service,
    PathParam(id): PathParam<RoleId>,
) -> impl IntoResponse {
    match service.list_users_for_role(id).await {
        Ok(users) => Json(users).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_users(
    State(service): Service,
    QueryParams(query): QueryParams<ListUsersQuery>,
) -> impl IntoResponse {
    match service.list_users(query.role_id).await {
        Ok(users) => Json(users).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_user(
    State(service): Service,
    PathParam(id): PathParam<UserId>,
) -> impl IntoResponse {
    match service.get_user(id).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_user(
    State(service): Service,
    PathParam(id): PathParam<UserId>,
    JsonBody(req): JsonBody<UpdateUserRequest>,
) -> impl IntoResponse {
    match service.update_user(id, req).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_user_role(
    State(service): Service,
    PathParam(id): PathParam<UserId>,
    JsonBody(req): JsonBody<UpdateUserRoleRequest>,
) -> impl IntoResponse {
    match service.update_user_role(id, req.role_id).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_user_status(
    State(service): Service,
    PathParam(id): PathParam<UserId>,
    JsonBody(req): JsonBody<UpdateUserStatusRequest>,
) -> impl IntoResponse {
    match service.update_user_status(id, req.status).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_user(
    State(service): Service,
    PathParam(id): PathParam<UserId>,
) -> impl IntoResponse {
    match service.delete_user(id).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn hierarchy_tree(State(service): Service) -> impl IntoResponse {
    match service.hierarchy_tree().await {
        Ok(tree) => Json(tree).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn validate_hierarchy(State(service): Service) -> impl IntoResponse {
    match service.validate_integrity().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn fix_levels(State(service): Service) -> impl IntoResponse {
    match service.fix_levels().await {
        Ok(fixed_count) => Json(FixLevelsResponse {
            message: format!("Fixed {fixed_count} role levels"),
            fixed_count,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn hierarchy_stats(State(service): Service) -> impl IntoResponse {
    match service.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn roles_with_permission(
    State(service): Service,
    PathParam(name): PathParam<String>,
) -> impl IntoResponse {
    match service.roles_with_permission(&name).await {
        Ok(roles) => Json(roles).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn user_permissions(
    State(service): Service,
    PathParam(user_id): PathParam<UserId>,
) -> impl IntoResponse {
    match service.effective_permissions_for_user(user_id).await {
        Ok(effective) => Json(effective).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn audit_log(
    State(service): Service,
    QueryParams(query): QueryParams<AuditQuery>,
) -> impl IntoResponse {
    match service.audit_log(query.action.as_deref(), query.limit).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn check_access(
    State(service): Service,
    JsonBody(req): JsonBody<CheckRequest>,
) -> impl IntoResponse {
    match service.check(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn require_role(
    State(service): Service,
    JsonBody(req): JsonBody<RequireRoleRequest>,
) -> impl IntoResponse {
    match service.require_role(req.role_id, &req.role_name).await {
        Ok(allowed) => Json(RequireRoleResponse { allowed }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
