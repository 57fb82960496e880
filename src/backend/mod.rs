// src/backend/mod.rs

//! Backend process gateway
//!
//! The [`Backend`] trait is the only path through which the engine reads or
//! mutates the system package database. Every mutating call is all-or-nothing
//! from the engine's point of view: a failed call is a failure, never a
//! partial success.
//!
//! [`PacmanBackend`] drives the `pacman` command-line tool.

mod pacman;

pub use pacman::PacmanBackend;

use crate::error::Result;
use crate::events::Events;
use crate::packages::{PackageRecord, PackageRef};
use std::collections::BTreeSet;
use std::path::Path;

/// Outcome of refreshing one sync database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Updated,
    UpToDate,
    Failed(String),
}

/// Per-repository result of [`Backend::sync_databases`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSync {
    pub repo: String,
    pub status: SyncStatus,
}

/// Queries and mutations against the system package manager
///
/// Query methods must be safe to call from several threads at once.
/// Mutating methods receive the event sink so the backend can report
/// per-package progress and route the questions it runs into.
pub trait Backend: Send + Sync {
    /// Names of all installed packages
    fn query_installed(&self) -> Result<BTreeSet<String>>;

    /// Metadata of an installed package (`NotFoundError` when absent)
    fn query_info(&self, name: &str) -> Result<PackageRecord>;

    /// Metadata of a package in the sync repositories (`NotFoundError` when absent)
    fn sync_info(&self, name: &str) -> Result<PackageRecord>;

    /// Search the sync repositories by name and description
    fn search_sync(&self, term: &str) -> Result<Vec<PackageRecord>>;

    /// Members of a sync group; empty when `group` is not a group
    fn group_members(&self, group: &str) -> Result<Vec<String>>;

    /// Members of a group among installed packages; empty when none
    fn local_group_members(&self, group: &str) -> Result<Vec<String>>;

    /// Installed sync packages with a newer version available
    fn query_upgradable(&self) -> Result<Vec<PackageRef>>;

    /// Installed packages not found in any sync repository (AUR or local builds)
    fn query_foreign(&self) -> Result<Vec<PackageRef>>;

    /// Packages installed as dependencies that no installed package requires
    fn query_unneeded(&self) -> Result<Vec<PackageRef>>;

    /// Installed package owning `path`; `None` when no package owns it
    fn query_owner(&self, path: &Path) -> Result<Option<PackageRef>>;

    /// Refresh the sync databases
    fn sync_databases(&self) -> Result<Vec<DatabaseSync>>;

    /// Install or upgrade packages from the sync repositories, in the given order
    fn install(&self, names: &[String], events: &dyn Events) -> Result<()>;

    /// Install a locally built package file
    fn install_from_file(&self, path: &Path, events: &dyn Events) -> Result<()>;

    /// Remove installed packages
    fn remove(&self, names: &[String], events: &dyn Events) -> Result<()>;

    /// Record packages as installed as dependencies
    fn mark_as_dependencies(&self, names: &[String]) -> Result<()>;
}
