//! Rolegraph - role-based access control with a role hierarchy
//!
//! Roles form a forest; each role inherits the permissions of every ancestor.
//! This library exposes all modules for testing purposes.

pub mod entities;
pub mod errors;
pub mod hierarchy;
pub mod settings;
pub mod storage;
pub mod web;
