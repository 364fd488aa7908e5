//! The redefinition engine: transaction coordination, affected-set search,
//! class diffing, layout planning, heap migration and link repair.
//!
//! # Key Components
//!
//! - [`coordinator::RedefineCoordinator`] - Drives one batch to commit or rollback
//! - [`session::RedefineSession`] - Per-transaction mutable state
//! - [`affected`] - Affected-set search and topological ordering
//! - [`diff`] - Class-pair classification and the method slot merge
//! - [`layout`] - Field migration planning ([`layout::MigrationProgram`])
//! - [`migrate`] - The safepoint-bound heap pass
//! - [`link`] - Post-commit resolution-cache repair

pub mod affected;
pub mod coordinator;
pub mod diff;
pub mod layout;
pub mod link;
pub mod migrate;
pub mod session;
