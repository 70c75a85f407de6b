use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::errors::AppError;
use crate::hierarchy::types::{PermissionId, RoleId, UserId};

#[derive(Debug, Error, Diagnostic)]
pub enum HierarchyError {
    #[error("Role {0} not found")]
    #[diagnostic(code(rolegraph::hierarchy::role_not_found))]
    RoleNotFound(RoleId),

    #[error("Parent role {0} not found")]
    #[diagnostic(
        code(rolegraph::hierarchy::parent_not_found),
        help("Create the parent role first, or omit parent_id to create a root role")
    )]
    ParentNotFound(RoleId),

    #[error("Permission {0} not found")]
    #[diagnostic(code(rolegraph::hierarchy::permission_not_found))]
    PermissionNotFound(PermissionId),

    #[error("User {0} not found")]
    #[diagnostic(code(rolegraph::hierarchy::user_not_found))]
    UserNotFound(UserId),

    #[error("A {entity} named `{name}` already exists")]
    #[diagnostic(code(rolegraph::hierarchy::duplicate_name))]
    DuplicateName { entity: &'static str, name: String },

    #[error("Role {0} cannot be its own parent")]
    #[diagnostic(code(rolegraph::hierarchy::self_parent))]
    SelfParent(RoleId),

    #[error("Making role {parent_id} the parent of role {role_id} would create a cycle")]
    #[diagnostic(
        code(rolegraph::hierarchy::cycle_would_form),
        help("A role cannot be placed under one of its own descendants")
    )]
    CycleWouldForm { role_id: RoleId, parent_id: RoleId },

    #[error("Cycle detected in the ancestor chain of role {0}")]
    #[diagnostic(
        code(rolegraph::hierarchy::cycle_detected),
        help("The stored hierarchy is corrupt; run the integrity check and repair parent_id values")
    )]
    CycleDetected(RoleId),

    #[error("Role {role_id} references missing parent {parent_id}")]
    #[diagnostic(
        code(rolegraph::hierarchy::dangling_parent),
        help("The stored hierarchy is corrupt; run the integrity check and repair parent_id values")
    )]
    DanglingParent { role_id: RoleId, parent_id: RoleId },

    #[error("Role {role_id} is still assigned to {users} user(s)")]
    #[diagnostic(
        code(rolegraph::hierarchy::role_in_use),
        help("Move the users to another role before deleting this one")
    )]
    RoleInUse { role_id: RoleId, users: u64 },

    #[error("Invalid input: {0}")]
    #[diagnostic(code(rolegraph::hierarchy::validation))]
    Validation(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] AppError),
}

impl From<sea_orm::DbErr> for HierarchyError {
    fn from(value: sea_orm::DbErr) -> Self {
        HierarchyError::Storage(AppError::Db(value))
    }
}

// Extractor failures are client input errors and share the JSON error body.
impl From<JsonRejection> for HierarchyError {
    fn from(rejection: JsonRejection) -> Self {
        HierarchyError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for HierarchyError {
    fn from(rejection: PathRejection) -> Self {
        HierarchyError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for HierarchyError {
    fn from(rejection: QueryRejection) -> Self {
        HierarchyError::Validation(rejection.body_text())
    }
}

impl HierarchyError {
    /// Stable machine-readable kind, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            HierarchyError::RoleNotFound(_) => "role_not_found",
            HierarchyError::ParentNotFound(_) => "parent_not_found",
            HierarchyError::PermissionNotFound(_) => "permission_not_found",
            HierarchyError::UserNotFound(_) => "user_not_found",
            HierarchyError::DuplicateName { .. } => "duplicate_name",
            HierarchyError::SelfParent(_) => "self_parent",
            HierarchyError::CycleWouldForm { .. } => "cycle_would_form",
            HierarchyError::CycleDetected(_) => "cycle_detected",
            HierarchyError::DanglingParent { .. } => "dangling_parent",
            HierarchyError::RoleInUse { .. } => "role_in_use",
            HierarchyError::Validation(_) => "validation",
            HierarchyError::Storage(_) => "storage",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HierarchyError::RoleNotFound(_)
            | HierarchyError::ParentNotFound(_)
            | HierarchyError::PermissionNotFound(_)
            | HierarchyError::UserNotFound(_) => StatusCode::NOT_FOUND,
            HierarchyError::DuplicateName { .. } | HierarchyError::RoleInUse { .. } => {
                StatusCode::CONFLICT
            }
            HierarchyError::SelfParent(_)
            | HierarchyError::CycleWouldForm { .. }
            | HierarchyError::Validation(_) => StatusCode::BAD_REQUEST,
            HierarchyError::CycleDetected(_)
            | HierarchyError::DanglingParent { .. }
            | HierarchyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HierarchyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Hierarchy request failed");
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}
