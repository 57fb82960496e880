// src/lib.rs

//! Potluck package transaction engine
//!
//! Library behind graphical front-ends to pacman and the Arch User
//! Repository. It searches both sources, turns the user's selections into a
//! dependency-closed set of changes, builds AUR packages from source, and
//! applies everything through pacman.
//!
//! # Architecture
//!
//! - Change sets: pending intents, one per package name
//! - Transactions: lock, classify, resolve, build, commit, release
//! - Build gate: nothing requested is installed unless every AUR build succeeds
//! - Event sink: every step, question and failure reported through one trait
//! - Collaborators behind traits: backend, AUR service, builder

pub mod aur;
pub mod backend;
pub mod builder;
pub mod changeset;
pub mod config;
mod error;
pub mod events;
pub mod logging;
pub mod packages;
pub mod repository;
pub mod resolver;
pub mod session;
pub mod source;
pub mod transaction;
pub mod version;

pub use aur::{AurClient, AurService, BuildDependencies, DependencyExtractor};
pub use backend::{Backend, DatabaseSync, PacmanBackend, SyncStatus};
pub use builder::{BuildJob, BuildState, MakepkgBuilder, PackageBuilder};
pub use changeset::{ChangeSet, Classification, Intent};
pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use error::{Error, FileConflict, MissingDependency, Result};
pub use events::{report_error, AutoAnswer, Events, LogEvents, NoEvents};
pub use packages::{InstallReason, PackageRecord, PackageRef, Source};
pub use repository::{Repository, RepositoryRegistry};
pub use resolver::{ResolvedTransaction, Resolver, VersionMismatch};
pub use session::Session;
pub use source::PackageSources;
pub use transaction::{CancelToken, Rights, Transaction, TransactionState, TransactionSummary};
pub use version::{DependencySpec, PkgVersion, VersionConstraint};
