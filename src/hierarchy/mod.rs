pub mod access;
pub mod errors;
pub mod index;
pub mod integrity;
pub mod memory;
pub mod report;
pub mod resolver;
pub mod service;
pub mod store;
pub mod types;
pub mod web;

use std::collections::{BTreeMap, BTreeSet};
use types::{Permission, PermissionId, Role, RoleId};

/// Consistent, in-memory view of the role table: an arena of role records
/// indexed by id plus the permission catalog.
///
/// A `Hierarchy` is loaded from a [`store::RoleStore`] snapshot per request and
/// never shared between writers. Mutations are planned on a clone and only the
/// changed records are written back.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    /// parent id -> child ids. Keys may name roles that do not exist when the
    /// stored data has dangling parent references.
    children: BTreeMap<RoleId, BTreeSet<RoleId>>,
}
