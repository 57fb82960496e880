// src/transaction/mod.rs

//! Transaction coordinator
//!
//! Drives one change set through the state machine
//!
//! ```text
//! Idle -> Initializing -> TargetsSet -> Prepared -> Committing -> Committed
//!                 \___________\____________\____________\-------> Failed
//!                                                 (any) -> Released
//! ```
//!
//! Every step that fails moves the transaction to `Failed` and reports the
//! error to the event sink exactly once. Nothing is retried.
//!
//! AUR packages are built in install order. Before a build runs, everything
//! it depends on must be installed, so the packages reachable from any AUR
//! package through the resolved dependencies (see
//! [`ResolvedTransaction::build_prerequisites`]) are installed ahead of the
//! build gate: sync ones in one batch before the first build, AUR ones right
//! after they are built. Requested targets and every other package wait
//! until all builds succeeded, so a failed build leaves them untouched.

use crate::builder::BuildJob;
use crate::changeset::{ChangeSet, Classification, Intent};
use crate::error::{Error, Result};
use crate::events::{report_error, Events};
use crate::packages::{InstallReason, PackageRef, Source};
use crate::resolver::{ResolvedTransaction, Resolver};
use crate::session::Session;
use crate::version;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as VersionOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transaction state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Created, nothing locked
    Idle,
    /// Lock held
    Initializing,
    /// Targets classified
    TargetsSet,
    /// Dependencies resolved
    Prepared,
    /// Building and applying
    Committing,
    Committed,
    Failed,
    /// Lock released; the transaction is finished
    Released,
}

/// Privilege level of the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rights {
    Root,
    User,
}

impl Rights {
    pub fn detect() -> Self {
        if nix::unistd::geteuid().is_root() {
            Self::Root
        } else {
            Self::User
        }
    }
}

/// Cooperative cancellation flag shared between threads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Return `Cancelled` if cancellation was requested
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(operation.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: String,
    /// Installed or upgraded, in install order
    pub installed: Vec<String>,
    pub removed: Vec<String>,
    /// AUR packages built from source
    pub built: Vec<String>,
    pub duration_ms: u64,
}

/// One transaction against the system package database
pub struct Transaction<'s> {
    session: &'s Session,
    events: &'s dyn Events,
    id: String,
    state: TransactionState,
    lock_file: Option<File>,
    cancel: CancelToken,
    started: DateTime<Utc>,
    classification: Option<Classification>,
    resolved: Option<ResolvedTransaction>,
    /// Installed versions of targets, captured while classifying
    installed_versions: BTreeMap<String, String>,
    installed: Vec<String>,
    removed: Vec<String>,
    built: Vec<String>,
}

impl<'s> Transaction<'s> {
    pub fn new(session: &'s Session, events: &'s dyn Events) -> Self {
        Self {
            session,
            events,
            id: Uuid::new_v4().to_string(),
            state: TransactionState::Idle,
            lock_file: None,
            cancel: CancelToken::new(),
            started: Utc::now(),
            classification: None,
            resolved: None,
            installed_versions: BTreeMap::new(),
            installed: Vec::new(),
            removed: Vec::new(),
            built: Vec::new(),
        }
    }

    /// Attach a cancel token checked between phases and during builds
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn resolved(&self) -> Option<&ResolvedTransaction> {
        self.resolved.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.lock_file.is_some()
    }

    /// Run one phase: check the state, run `f`, and on failure move to
    /// `Failed` and report the error
    fn step<T>(
        &mut self,
        expected: TransactionState,
        during: TransactionState,
        done: TransactionState,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let result = if self.state == expected {
            self.state = during;
            f(self)
        } else {
            Err(Error::InvalidState(format!(
                "expected {:?}, transaction is {:?}",
                expected, self.state
            )))
        };

        match &result {
            Ok(_) => self.state = done,
            Err(e) => {
                self.state = TransactionState::Failed;
                report_error(self.events, e);
            }
        }
        result
    }

    /// Take the transaction lock
    ///
    /// Fails with `PermissionError` when not privileged and with
    /// `LockedError` when another transaction or a running pacman holds the
    /// database. Never waits.
    pub fn acquire(&mut self) -> Result<()> {
        self.step(
            TransactionState::Idle,
            TransactionState::Initializing,
            TransactionState::Initializing,
            |tx| tx.do_acquire(),
        )
    }

    fn do_acquire(&mut self) -> Result<()> {
        if self.session.rights() != Rights::Root {
            return Err(Error::PermissionError(
                "you cannot perform this operation unless you are root".to_string(),
            ));
        }

        let session = self.session;
        let options = &session.config().options;
        if let Some(parent) = options.lock_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = File::create(&options.lock_file)?;
        if let Err(e) = lock_file.try_lock_exclusive() {
            return Err(Error::LockedError(format!(
                "{} is held by another transaction ({})",
                options.lock_file.display(),
                e
            )));
        }

        let pacman_lock = options.pacman_lock();
        if pacman_lock.exists() {
            let _ = FileExt::unlock(&lock_file);
            return Err(Error::LockedError(format!(
                "{} exists; is pacman running?",
                pacman_lock.display()
            )));
        }

        debug!("Transaction {} acquired {}", self.id, options.lock_file.display());
        self.lock_file = Some(lock_file);
        self.events.done_transaction_init();
        Ok(())
    }

    /// Classify the change set by origin, expanding groups
    pub fn set_targets(&mut self, changeset: &ChangeSet) -> Result<&Classification> {
        self.step(
            TransactionState::Initializing,
            TransactionState::Initializing,
            TransactionState::TargetsSet,
            |tx| tx.do_set_targets(changeset),
        )?;
        self.classification
            .as_ref()
            .ok_or_else(|| Error::InvalidState("targets not set".to_string()))
    }

    fn do_set_targets(&mut self, changeset: &ChangeSet) -> Result<()> {
        self.cancel.check("setting targets")?;
        let classifier = Classifier::new(self.session, self.events, &self.cancel)?;
        let (classification, installed_versions) = classifier.classify(changeset)?;

        info!(
            "Transaction {}: {} to install or upgrade, {} to remove",
            self.id,
            classification.install_count(),
            classification.removes.len()
        );
        self.events.done_setting_targets(&classification);
        self.classification = Some(classification);
        self.installed_versions = installed_versions;
        Ok(())
    }

    /// Resolve dependencies
    pub fn prepare(&mut self) -> Result<&ResolvedTransaction> {
        self.step(
            TransactionState::TargetsSet,
            TransactionState::TargetsSet,
            TransactionState::Prepared,
            |tx| tx.do_prepare(),
        )?;
        self.resolved
            .as_ref()
            .ok_or_else(|| Error::InvalidState("transaction not prepared".to_string()))
    }

    fn do_prepare(&mut self) -> Result<()> {
        self.cancel.check("resolving dependencies")?;
        let classification = self
            .classification
            .as_ref()
            .ok_or_else(|| Error::InvalidState("targets not set".to_string()))?;

        self.events.start_resolving_dependencies();
        let sources = self.session.sources().with_cancel(self.cancel.clone());
        let resolved = Resolver::new(&sources).resolve(classification)?;

        self.events.start_checking_dependencies();
        if resolved.is_empty() {
            return Err(Error::NothingToBeDoneError);
        }

        self.events.done_transaction_prepare(&resolved);
        self.resolved = Some(resolved);
        Ok(())
    }

    /// Build AUR packages and apply every change
    pub fn commit(&mut self) -> Result<()> {
        self.step(
            TransactionState::Prepared,
            TransactionState::Committing,
            TransactionState::Committed,
            |tx| tx.do_commit(),
        )
    }

    fn do_commit(&mut self) -> Result<()> {
        let resolved = self
            .resolved
            .take()
            .ok_or_else(|| Error::InvalidState("transaction not prepared".to_string()))?;
        let session = self.session;
        let _gate = session.commit_gate().write().unwrap_or_else(|e| e.into_inner());

        let removes = resolved.removes();
        self.events
            .processing_packages(&resolved.install_order, &removes);
        let aur: Vec<PackageRef> = resolved
            .install_order
            .iter()
            .filter(|p| p.is_aur())
            .cloned()
            .collect();
        if !aur.is_empty() {
            self.events.processing_aur_packages(&aur);
        }

        let prereqs = resolved.build_prerequisites();
        let mut jobs: Vec<BuildJob> = Vec::new();
        let result = self
            .install_prerequisites(&resolved, &prereqs)
            .and_then(|()| self.build_all(&resolved, &aur, &prereqs, &mut jobs))
            .and_then(|()| self.apply(&resolved, &prereqs, &jobs));

        for job in jobs {
            let pkg = job.target.clone();
            match session.builder().cleanup(job) {
                Ok(()) => self.events.done_build_directory_cleanup(&pkg),
                Err(e) => warn!("Failed to clean build directory of {}: {}", pkg.name, e),
            }
        }

        self.resolved = Some(resolved);
        result?;
        self.events.done_transaction_commit();
        info!("Transaction {} committed", self.id);
        Ok(())
    }

    /// Install the sync packages some AUR build depends on
    fn install_prerequisites(
        &mut self,
        resolved: &ResolvedTransaction,
        prereqs: &BTreeSet<String>,
    ) -> Result<()> {
        let sync: Vec<&PackageRef> = resolved
            .install_order
            .iter()
            .filter(|p| p.source == Source::Sync && prereqs.contains(&p.name))
            .collect();
        if sync.is_empty() {
            return Ok(());
        }

        self.cancel.check("installing build dependencies")?;
        info!("Installing {} packages needed to build AUR packages", sync.len());
        self.install_sync(&sync)?;
        self.mark_dependencies(resolved, sync.iter().map(|p| p.name.as_str()))
    }

    /// Build every AUR package, dependencies first
    ///
    /// An AUR package that another build depends on is installed as soon as
    /// it is built. The first failure stops the loop.
    fn build_all(
        &mut self,
        resolved: &ResolvedTransaction,
        aur: &[PackageRef],
        prereqs: &BTreeSet<String>,
        jobs: &mut Vec<BuildJob>,
    ) -> Result<()> {
        let session = self.session;
        let builder = session.builder();
        for pkg in aur {
            self.cancel.check("building")?;

            self.events.start_build_prepare(pkg);
            let mut job = builder.prepare(pkg)?;
            self.events.done_build_prepare(pkg);

            self.events.start_build(pkg);
            let built = builder.build(&mut job, &self.cancel);
            let artifact = job.artifact.clone();
            jobs.push(job);
            let artifact = built.map(|path| artifact.unwrap_or(path))?;

            self.events.done_build(pkg, &artifact);
            self.built.push(pkg.name.clone());

            if prereqs.contains(&pkg.name) {
                debug!("{} is needed by another build; installing it now", pkg.name);
                self.cancel.check("installing")?;
                self.install_artifact(pkg, &artifact)?;
                self.mark_dependencies(resolved, std::iter::once(pkg.name.as_str()))?;
            }
        }
        Ok(())
    }

    /// Everything not installed yet: sync packages, built artifacts,
    /// dependency marks, then removals
    fn apply(
        &mut self,
        resolved: &ResolvedTransaction,
        prereqs: &BTreeSet<String>,
        jobs: &[BuildJob],
    ) -> Result<()> {
        self.cancel.check("installing")?;
        let session = self.session;
        let backend = session.backend();

        let sync: Vec<&PackageRef> = resolved
            .install_order
            .iter()
            .filter(|p| p.source == Source::Sync && !prereqs.contains(&p.name))
            .collect();
        if !sync.is_empty() {
            self.install_sync(&sync)?;
        }

        for job in jobs.iter().filter(|j| !prereqs.contains(&j.target.name)) {
            let artifact = job.artifact.as_ref().ok_or_else(|| {
                Error::InvalidState(format!("{} has no built package", job.target.name))
            })?;
            self.install_artifact(&job.target, artifact)?;
        }

        self.mark_dependencies(
            resolved,
            resolved
                .install_order
                .iter()
                .filter(|p| !prereqs.contains(&p.name))
                .map(|p| p.name.as_str()),
        )?;

        let removes = resolved.removes();
        if !removes.is_empty() {
            let names: Vec<String> = removes.iter().map(|p| p.name.clone()).collect();
            for pkg in &removes {
                self.events.start_removing_package(pkg);
            }
            backend.remove(&names, self.events)?;
            for pkg in &removes {
                self.events.done_removing_package(pkg);
            }
            self.removed.extend(names);
        }
        Ok(())
    }

    fn install_artifact(&mut self, pkg: &PackageRef, artifact: &Path) -> Result<()> {
        self.start_adding(pkg);
        self.session.backend().install_from_file(artifact, self.events)?;
        self.done_adding(pkg);
        Ok(())
    }

    /// Record the pulled-in packages among `names` as dependencies
    fn mark_dependencies<'n>(
        &self,
        resolved: &ResolvedTransaction,
        names: impl Iterator<Item = &'n str>,
    ) -> Result<()> {
        let deps: Vec<String> = names
            .filter(|n| resolved.is_dependency(n))
            .map(str::to_string)
            .collect();
        if deps.is_empty() {
            return Ok(());
        }
        self.session.backend().mark_as_dependencies(&deps)
    }

    /// One backend call for a batch of sync packages
    fn install_sync(&mut self, pkgs: &[&PackageRef]) -> Result<()> {
        let names: Vec<String> = pkgs.iter().map(|p| p.name.clone()).collect();
        for pkg in pkgs {
            self.start_adding(pkg);
        }
        self.session.backend().install(&names, self.events)?;
        for pkg in pkgs {
            self.done_adding(pkg);
        }
        Ok(())
    }

    fn is_upgrade(&self, name: &str) -> bool {
        self.installed_versions.contains_key(name)
    }

    fn start_adding(&self, pkg: &PackageRef) {
        if self.is_upgrade(&pkg.name) {
            self.events.start_upgrading_package(pkg);
        } else {
            self.events.start_installing_package(pkg);
        }
    }

    fn done_adding(&mut self, pkg: &PackageRef) {
        match self.installed_versions.get(&pkg.name) {
            Some(from) => self.events.done_upgrading_package(pkg, from),
            None => self.events.done_installing_package(pkg),
        }
        self.installed.push(pkg.name.clone());
    }

    /// Release the lock; safe to call more than once
    pub fn release(&mut self) {
        if self.state == TransactionState::Released {
            return;
        }
        if let Some(lock) = self.lock_file.take()
            && let Err(e) = FileExt::unlock(&lock)
        {
            warn!("Failed to unlock transaction lock: {}", e);
        }
        self.state = TransactionState::Released;
        self.events.done_transaction_release();
        debug!("Transaction {} released", self.id);
    }

    pub fn summary(&self) -> TransactionSummary {
        let duration = Utc::now()
            .signed_duration_since(self.started)
            .num_milliseconds()
            .max(0) as u64;

        TransactionSummary {
            id: self.id.clone(),
            installed: self.installed.clone(),
            removed: self.removed.clone(),
            built: self.built.clone(),
            duration_ms: duration,
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Turns raw intents into a [`Classification`]
struct Classifier<'a> {
    session: &'a Session,
    events: &'a dyn Events,
    cancel: &'a CancelToken,
    installed: BTreeSet<String>,
}

impl<'a> Classifier<'a> {
    fn new(session: &'a Session, events: &'a dyn Events, cancel: &'a CancelToken) -> Result<Self> {
        let installed = session.backend().query_installed()?;
        Ok(Self {
            session,
            events,
            cancel,
            installed,
        })
    }

    fn classify(&self, changeset: &ChangeSet) -> Result<(Classification, BTreeMap<String, String>)> {
        let mut classification = Classification::default();
        let mut installed_versions = BTreeMap::new();
        let mut missing = Vec::new();

        let additions = changeset
            .installs()
            .values()
            .map(|p| (p, Intent::Install))
            .chain(changeset.upgrades().values().map(|p| (p, Intent::Upgrade)));

        for (pkg, intent) in additions {
            self.cancel.check("setting targets")?;
            match self.candidate(pkg)? {
                Some(candidate) => {
                    self.add_target(candidate, intent, false, &mut classification, &mut installed_versions)?;
                }
                None => {
                    let members = self.session.backend().group_members(&pkg.name)?;
                    if members.is_empty() {
                        missing.push(pkg.name.clone());
                        continue;
                    }
                    debug!("Expanding group {} to {} packages", pkg.name, members.len());
                    for member in &members {
                        match self.candidate(&PackageRef::sync(member.as_str(), ""))? {
                            Some(candidate) => self.add_target(
                                candidate,
                                Intent::Install,
                                true,
                                &mut classification,
                                &mut installed_versions,
                            )?,
                            None => missing.push(member.clone()),
                        }
                    }
                    classification.expanded_groups.insert(pkg.name.clone(), members);
                }
            }
        }

        for pkg in changeset.removes().values() {
            if self.installed.contains(&pkg.name) {
                self.add_removal(pkg.clone(), &mut classification);
                continue;
            }
            let members = self.session.backend().local_group_members(&pkg.name)?;
            if members.is_empty() {
                missing.push(pkg.name.clone());
                continue;
            }
            for member in &members {
                let record = self.session.backend().query_info(member)?;
                self.add_removal(record.to_ref(), &mut classification);
            }
            classification.expanded_groups.insert(pkg.name.clone(), members);
        }

        if !missing.is_empty() {
            return Err(Error::NotFoundError(missing));
        }

        if self.session.config().options.remove_unneeded_dependencies
            && !classification.removes.is_empty()
        {
            self.add_unneeded_dependencies(&mut classification)?;
        }

        let overlapping = classification.overlapping();
        if !overlapping.is_empty() {
            return Err(Error::ConflictingDependenciesError(format!(
                "{} marked for more than one action",
                overlapping.join(", ")
            )));
        }
        Ok((classification, installed_versions))
    }

    /// Extend the removals with installed dependencies nothing else needs
    ///
    /// A candidate qualifies once it was installed as a dependency and every
    /// package requiring it is itself being removed. Candidates still needed
    /// are retried after each round, since a later removal may free them.
    fn add_unneeded_dependencies(&self, classification: &mut Classification) -> Result<()> {
        let backend = self.session.backend();
        let mut removing: BTreeSet<String> = classification.removes.keys().cloned().collect();
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for name in &removing {
            candidates.extend(backend.query_info(name)?.dependency_names());
        }

        loop {
            self.cancel.check("setting targets")?;
            let mut progress = false;
            for name in candidates.clone() {
                if removing.contains(&name)
                    || classification.is_target(&name)
                    || !self.installed.contains(&name)
                {
                    candidates.remove(&name);
                    continue;
                }

                let record = backend.query_info(&name)?;
                if record.install_reason != Some(InstallReason::Dependency) {
                    candidates.remove(&name);
                    continue;
                }
                if !record.required_by.iter().all(|r| removing.contains(r)) {
                    continue;
                }

                candidates.remove(&name);
                self.add_removal(record.to_ref(), classification);
                if classification.removes.contains_key(&name) {
                    debug!("{} is no longer needed", name);
                    candidates.extend(record.dependency_names());
                    removing.insert(name);
                    progress = true;
                }
            }
            if !progress {
                return Ok(());
            }
        }
    }

    /// Current candidate for `pkg` in its source, `None` when unknown there
    fn candidate(&self, pkg: &PackageRef) -> Result<Option<PackageRef>> {
        match self.session.sources().record(&pkg.name, pkg.source) {
            Ok(record) => Ok(Some(record.to_ref())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn add_target(
        &self,
        candidate: PackageRef,
        intent: Intent,
        from_group: bool,
        classification: &mut Classification,
        installed_versions: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        let options = &self.session.config().options;
        if options.ignore_pkgs.contains(&candidate.name)
            && !self.events.ask_install_ignore_pkg(&candidate)
        {
            info!("Skipping ignored package {}", candidate.name);
            return Ok(());
        }

        if !self.installed.contains(&candidate.name) {
            classification.insert(candidate, Intent::Install);
            return Ok(());
        }

        let local = self.session.backend().query_info(&candidate.name)?;
        match version::compare(&candidate.version, &local.version) {
            VersionOrdering::Greater => {
                installed_versions.insert(candidate.name.clone(), local.version);
                classification.insert(candidate, Intent::Upgrade);
            }
            VersionOrdering::Equal if intent == Intent::Install => {
                if from_group {
                    debug!("{} is up to date -- skipping", candidate.name);
                    return Ok(());
                }
                self.events.reinstalling_package(&candidate);
                classification.insert(candidate, Intent::Install);
            }
            VersionOrdering::Equal => {
                debug!("{} is up to date", candidate.name);
            }
            _ => {
                if from_group {
                    debug!("{} is newer locally -- skipping", candidate.name);
                    return Ok(());
                }
                if !self.events.ask_upgrade_local_newer(&candidate, &local.version) {
                    info!("Keeping local {} {}", candidate.name, local.version);
                    return Ok(());
                }
                installed_versions.insert(candidate.name.clone(), local.version);
                classification.insert(candidate, Intent::Upgrade);
            }
        }
        Ok(())
    }

    fn add_removal(&self, pkg: PackageRef, classification: &mut Classification) {
        let options = &self.session.config().options;
        if options.hold_pkgs.contains(&pkg.name) && !self.events.ask_remove_hold_pkg(&pkg) {
            info!("Keeping held package {}", pkg.name);
            return;
        }
        classification.insert(pkg, Intent::Remove);
    }
}
