// src/events.rs

//! Event sink for transaction progress and decisions
//!
//! The coordinator reports everything it does through the [`Events`] trait.
//! Every method has a default no-op body, so a listener only overrides the
//! hooks it cares about. Question methods (`ask_*`) are synchronous decision
//! points: the coordinator blocks on the answer, and the default is to
//! decline.
//!
//! Implementations:
//! - [`LogEvents`]: logs every event through `tracing`, optionally
//!   forwarding to an inner sink
//! - [`AutoAnswer`]: answers every question with a fixed policy
//!
//! Failures reach the sink through [`report_error`], which maps each error
//! kind onto exactly one failure event.

use crate::changeset::Classification;
use crate::error::Error;
use crate::packages::PackageRef;
use crate::resolver::ResolvedTransaction;
use std::path::Path;
use tracing::{debug, info, warn};

/// Notifications and questions emitted by a transaction
#[allow(unused_variables)]
pub trait Events: Send + Sync {
    // Checks
    fn start_checking_dependencies(&self) {}
    fn start_resolving_dependencies(&self) {}

    // Package progress
    fn start_installing_package(&self, pkg: &PackageRef) {}
    fn done_installing_package(&self, pkg: &PackageRef) {}
    fn start_upgrading_package(&self, pkg: &PackageRef) {}
    fn done_upgrading_package(&self, pkg: &PackageRef, from_version: &str) {}
    fn start_removing_package(&self, pkg: &PackageRef) {}
    fn done_removing_package(&self, pkg: &PackageRef) {}
    fn reinstalling_package(&self, pkg: &PackageRef) {}

    // Questions
    /// A target is listed in IgnorePkg; install it anyway?
    fn ask_install_ignore_pkg(&self, pkg: &PackageRef) -> bool {
        false
    }
    /// The installed version is newer than the candidate; upgrade anyway?
    fn ask_upgrade_local_newer(&self, pkg: &PackageRef, installed_version: &str) -> bool {
        false
    }
    /// A target is listed in HoldPkg; remove it anyway?
    fn ask_remove_hold_pkg(&self, pkg: &PackageRef) -> bool {
        false
    }
    /// Replace `pkg` with `replacement` from `repo`?
    fn ask_replace_package(&self, pkg: &str, replacement: &str, repo: &str) -> bool {
        false
    }
    /// `pkg` conflicts with `conflicting`; remove `conflicting`?
    fn ask_remove_conflicting_package(&self, pkg: &str, conflicting: &str) -> bool {
        false
    }
    /// A downloaded package file is corrupted; delete it?
    fn ask_remove_corrupted_package(&self, pkg: &str) -> bool {
        false
    }

    // Databases
    fn database_up_to_date(&self, repo: &str) {}
    fn database_updated(&self, repo: &str) {}
    fn database_update_error(&self, repo: &str, error: &Error) {}

    // Transaction lifecycle
    fn done_transaction_init(&self) {}
    fn done_setting_targets(&self, classification: &Classification) {}
    fn done_transaction_prepare(&self, resolved: &ResolvedTransaction) {}
    fn processing_packages(&self, add: &[PackageRef], remove: &[PackageRef]) {}
    fn processing_aur_packages(&self, add: &[PackageRef]) {}
    fn done_transaction_commit(&self) {}
    fn done_transaction_release(&self) {}

    // Building
    fn start_build_prepare(&self, pkg: &PackageRef) {}
    fn done_build_prepare(&self, pkg: &PackageRef) {}
    fn start_build(&self, pkg: &PackageRef) {}
    fn done_build(&self, pkg: &PackageRef, artifact: &Path) {}
    fn done_build_directory_cleanup(&self, pkg: &PackageRef) {}

    // Failures
    fn package_not_found(&self, error: &Error) {}
    fn unsatisfied_dependencies(&self, error: &Error) {}
    fn file_conflict_detected(&self, error: &Error) {}
    fn conflicting_dependencies(&self, error: &Error) {}
    fn nothing_to_be_done(&self, error: &Error) {}
    fn not_root(&self, error: &Error) {}
    fn build_problem(&self, error: &Error) {}
    fn user_abort(&self, error: &Error) {}
    /// Any failure without a dedicated event (lock, backend, network, I/O)
    fn transaction_failed(&self, error: &Error) {}
}

/// Sink that ignores everything and declines every question
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl Events for NoEvents {}

/// Forward an error to the single failure event matching its kind
pub fn report_error(events: &dyn Events, error: &Error) {
    match error {
        Error::PermissionError(_) => events.not_root(error),
        Error::NotFoundError(_) => events.package_not_found(error),
        Error::UnsatisfiedDependenciesError(_) => events.unsatisfied_dependencies(error),
        Error::FileConflictError(_) => events.file_conflict_detected(error),
        Error::ConflictingDependenciesError(_) => events.conflicting_dependencies(error),
        Error::NothingToBeDoneError => events.nothing_to_be_done(error),
        Error::BuildError { .. } => events.build_problem(error),
        Error::Cancelled(_) => events.user_abort(error),
        _ => events.transaction_failed(error),
    }
}

/// Answers every question with the same policy
///
/// Useful for unattended runs where no one can be asked.
#[derive(Debug, Clone, Copy)]
pub struct AutoAnswer {
    pub answer: bool,
}

impl AutoAnswer {
    pub fn yes() -> Self {
        Self { answer: true }
    }

    pub fn no() -> Self {
        Self { answer: false }
    }
}

impl Events for AutoAnswer {
    fn ask_install_ignore_pkg(&self, _pkg: &PackageRef) -> bool {
        self.answer
    }
    fn ask_upgrade_local_newer(&self, _pkg: &PackageRef, _installed_version: &str) -> bool {
        self.answer
    }
    fn ask_remove_hold_pkg(&self, _pkg: &PackageRef) -> bool {
        self.answer
    }
    fn ask_replace_package(&self, _pkg: &str, _replacement: &str, _repo: &str) -> bool {
        self.answer
    }
    fn ask_remove_conflicting_package(&self, _pkg: &str, _conflicting: &str) -> bool {
        self.answer
    }
    fn ask_remove_corrupted_package(&self, _pkg: &str) -> bool {
        self.answer
    }
}

/// Logs every event, then forwards it to an optional inner sink
///
/// Without an inner sink, questions are declined.
pub struct LogEvents<'a> {
    inner: Option<&'a dyn Events>,
}

impl<'a> LogEvents<'a> {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Log, then delegate to `inner`
    pub fn wrap(inner: &'a dyn Events) -> Self {
        Self { inner: Some(inner) }
    }

    fn forward(&self, f: impl FnOnce(&dyn Events)) {
        if let Some(inner) = self.inner {
            f(inner);
        }
    }

    fn ask(&self, f: impl FnOnce(&dyn Events) -> bool) -> bool {
        let answer = self.inner.map(f).unwrap_or(false);
        debug!("answer: {}", if answer { "yes" } else { "no" });
        answer
    }
}

impl Default for LogEvents<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Events for LogEvents<'_> {
    fn start_checking_dependencies(&self) {
        debug!("checking dependencies");
        self.forward(|e| e.start_checking_dependencies());
    }
    fn start_resolving_dependencies(&self) {
        debug!("resolving dependencies");
        self.forward(|e| e.start_resolving_dependencies());
    }

    fn start_installing_package(&self, pkg: &PackageRef) {
        info!("installing {}", pkg);
        self.forward(|e| e.start_installing_package(pkg));
    }
    fn done_installing_package(&self, pkg: &PackageRef) {
        debug!("installed {}", pkg);
        self.forward(|e| e.done_installing_package(pkg));
    }
    fn start_upgrading_package(&self, pkg: &PackageRef) {
        info!("upgrading {}", pkg);
        self.forward(|e| e.start_upgrading_package(pkg));
    }
    fn done_upgrading_package(&self, pkg: &PackageRef, from_version: &str) {
        debug!("upgraded {} (from {})", pkg, from_version);
        self.forward(|e| e.done_upgrading_package(pkg, from_version));
    }
    fn start_removing_package(&self, pkg: &PackageRef) {
        info!("removing {}", pkg);
        self.forward(|e| e.start_removing_package(pkg));
    }
    fn done_removing_package(&self, pkg: &PackageRef) {
        debug!("removed {}", pkg);
        self.forward(|e| e.done_removing_package(pkg));
    }
    fn reinstalling_package(&self, pkg: &PackageRef) {
        warn!("{} is up to date -- reinstalling", pkg);
        self.forward(|e| e.reinstalling_package(pkg));
    }

    fn ask_install_ignore_pkg(&self, pkg: &PackageRef) -> bool {
        info!("{} is in IgnorePkg/IgnoreGroup, asking whether to install", pkg.name);
        self.ask(|e| e.ask_install_ignore_pkg(pkg))
    }
    fn ask_upgrade_local_newer(&self, pkg: &PackageRef, installed_version: &str) -> bool {
        info!(
            "local {} ({}) is newer than {}, asking whether to upgrade",
            pkg.name, installed_version, pkg.version
        );
        self.ask(|e| e.ask_upgrade_local_newer(pkg, installed_version))
    }
    fn ask_remove_hold_pkg(&self, pkg: &PackageRef) -> bool {
        info!("{} is in HoldPkg, asking whether to remove", pkg.name);
        self.ask(|e| e.ask_remove_hold_pkg(pkg))
    }
    fn ask_replace_package(&self, pkg: &str, replacement: &str, repo: &str) -> bool {
        info!("asking whether to replace {} with {}/{}", pkg, repo, replacement);
        self.ask(|e| e.ask_replace_package(pkg, replacement, repo))
    }
    fn ask_remove_conflicting_package(&self, pkg: &str, conflicting: &str) -> bool {
        info!("{} conflicts with {}, asking whether to remove it", pkg, conflicting);
        self.ask(|e| e.ask_remove_conflicting_package(pkg, conflicting))
    }
    fn ask_remove_corrupted_package(&self, pkg: &str) -> bool {
        info!("{} is corrupted, asking whether to delete it", pkg);
        self.ask(|e| e.ask_remove_corrupted_package(pkg))
    }

    fn database_up_to_date(&self, repo: &str) {
        info!("{} is up to date", repo);
        self.forward(|e| e.database_up_to_date(repo));
    }
    fn database_updated(&self, repo: &str) {
        info!("{} updated", repo);
        self.forward(|e| e.database_updated(repo));
    }
    fn database_update_error(&self, repo: &str, error: &Error) {
        warn!("failed to update {}: {}", repo, error);
        self.forward(|e| e.database_update_error(repo, error));
    }

    fn done_transaction_init(&self) {
        debug!("transaction initialized");
        self.forward(|e| e.done_transaction_init());
    }
    fn done_setting_targets(&self, classification: &Classification) {
        debug!("targets set: {} entries", classification.len());
        self.forward(|e| e.done_setting_targets(classification));
    }
    fn done_transaction_prepare(&self, resolved: &ResolvedTransaction) {
        debug!(
            "transaction prepared: {} to add, {} to remove",
            resolved.add_count(),
            resolved.remove_count()
        );
        self.forward(|e| e.done_transaction_prepare(resolved));
    }
    fn processing_packages(&self, add: &[PackageRef], remove: &[PackageRef]) {
        info!("processing {} additions and {} removals", add.len(), remove.len());
        self.forward(|e| e.processing_packages(add, remove));
    }
    fn processing_aur_packages(&self, add: &[PackageRef]) {
        info!("processing {} AUR packages", add.len());
        self.forward(|e| e.processing_aur_packages(add));
    }
    fn done_transaction_commit(&self) {
        info!("transaction committed");
        self.forward(|e| e.done_transaction_commit());
    }
    fn done_transaction_release(&self) {
        debug!("transaction released");
        self.forward(|e| e.done_transaction_release());
    }

    fn start_build_prepare(&self, pkg: &PackageRef) {
        info!("preparing build of {}", pkg.name);
        self.forward(|e| e.start_build_prepare(pkg));
    }
    fn done_build_prepare(&self, pkg: &PackageRef) {
        debug!("build of {} prepared", pkg.name);
        self.forward(|e| e.done_build_prepare(pkg));
    }
    fn start_build(&self, pkg: &PackageRef) {
        info!("building {}", pkg.name);
        self.forward(|e| e.start_build(pkg));
    }
    fn done_build(&self, pkg: &PackageRef, artifact: &Path) {
        info!("built {} -> {}", pkg.name, artifact.display());
        self.forward(|e| e.done_build(pkg, artifact));
    }
    fn done_build_directory_cleanup(&self, pkg: &PackageRef) {
        debug!("cleaned build directory of {}", pkg.name);
        self.forward(|e| e.done_build_directory_cleanup(pkg));
    }

    fn package_not_found(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.package_not_found(error));
    }
    fn unsatisfied_dependencies(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.unsatisfied_dependencies(error));
    }
    fn file_conflict_detected(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.file_conflict_detected(error));
    }
    fn conflicting_dependencies(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.conflicting_dependencies(error));
    }
    fn nothing_to_be_done(&self, error: &Error) {
        info!("{}", error);
        self.forward(|e| e.nothing_to_be_done(error));
    }
    fn not_root(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.not_root(error));
    }
    fn build_problem(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.build_problem(error));
    }
    fn user_abort(&self, error: &Error) {
        info!("{}", error);
        self.forward(|e| e.user_abort(error));
    }
    fn transaction_failed(&self, error: &Error) {
        warn!("{}", error);
        self.forward(|e| e.transaction_failed(error));
    }
}
