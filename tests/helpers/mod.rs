#![allow(dead_code)]

pub mod builders;
pub mod db;
pub mod http;

pub use builders::{PermissionBuilder, RoleBuilder, UserBuilder};
pub use db::TestDb;
