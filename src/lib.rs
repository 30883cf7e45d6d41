//! Gatehouse - role-based access control authority
//!
//! Holds the user -> role and role -> permission mappings, answers
//! authorization queries over them, and records every change in an
//! append-only audit ledger within the same transaction.
//! All modules are exposed for integration testing.

pub mod entities;
pub mod errors;
pub mod jobs;
pub mod rbac;
pub mod settings;
pub mod storage;
pub mod web;
