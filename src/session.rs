// src/session.rs

//! Session: the entry point front-ends hold on to
//!
//! A [`Session`] owns the configuration and every collaborator. Queries may
//! run from several threads at once; a commit takes the session's commit
//! gate exclusively, so no query observes a half-applied transaction.

use crate::aur::{AurClient, AurService, DependencyExtractor, InlineExtractor, ScriptExtractor};
use crate::backend::{Backend, DatabaseSync, PacmanBackend, SyncStatus};
use crate::builder::{MakepkgBuilder, PackageBuilder};
use crate::changeset::ChangeSet;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{report_error, Events};
use crate::packages::{PackageRecord, PackageRef, Source};
use crate::repository::RepositoryRegistry;
use crate::source::PackageSources;
use crate::transaction::{CancelToken, Rights, Transaction, TransactionSummary};
use crate::version;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

pub struct Session {
    config: Config,
    backend: Box<dyn Backend>,
    aur: Option<Arc<dyn AurService>>,
    extractor: Box<dyn DependencyExtractor>,
    builder: Box<dyn PackageBuilder>,
    registry: RepositoryRegistry,
    rights: Rights,
    commit_gate: RwLock<()>,
}

impl Session {
    /// Session backed by pacman, the AUR web service and makepkg
    pub fn new(config: Config) -> Result<Self> {
        let rights = Rights::detect();
        let backend = Box::new(PacmanBackend::new(&config.options));
        let aur: Option<Arc<dyn AurService>> = if config.aur.enabled {
            Some(Arc::new(AurClient::new(&config.aur)?))
        } else {
            None
        };
        let builder = Box::new(MakepkgBuilder::new(config.build.clone(), aur.clone(), rights));

        Ok(Self::from_parts(config, backend, aur, builder, rights))
    }

    /// Session over caller-supplied collaborators
    pub fn from_parts(
        config: Config,
        backend: Box<dyn Backend>,
        aur: Option<Arc<dyn AurService>>,
        builder: Box<dyn PackageBuilder>,
        rights: Rights,
    ) -> Self {
        let extractor: Box<dyn DependencyExtractor> = match &config.aur.extractor {
            Some(program) => Box::new(ScriptExtractor::new(program)),
            None => Box::new(InlineExtractor),
        };
        let registry = RepositoryRegistry::from_names(config.options.repos.iter().cloned());

        Self {
            config,
            backend,
            aur,
            extractor,
            builder,
            registry,
            rights,
            commit_gate: RwLock::new(()),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn DependencyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn builder(&self) -> &dyn PackageBuilder {
        self.builder.as_ref()
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RepositoryRegistry {
        &mut self.registry
    }

    pub(crate) fn commit_gate(&self) -> &RwLock<()> {
        &self.commit_gate
    }

    fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Source adapter over this session's collaborators
    pub fn sources(&self) -> PackageSources<'_> {
        PackageSources::new(self.backend.as_ref(), self.aur.as_deref(), self.extractor.as_ref())
    }

    /// Search both package sources
    pub fn search(&self, query: &str) -> Result<Vec<PackageRecord>> {
        let _gate = self.read_gate();
        self.sources().search(query)
    }

    pub fn info(&self, name: &str, source: Source) -> Result<PackageRecord> {
        let _gate = self.read_gate();
        self.sources().info(name, source)
    }

    /// Metadata of an installed package, files included
    pub fn local_info(&self, name: &str) -> Result<PackageRecord> {
        let _gate = self.read_gate();
        self.backend.query_info(name)
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        let _gate = self.read_gate();
        self.sources().is_installed(name)
    }

    /// Refresh the sync databases, reporting each repository's outcome
    pub fn update_databases(&self, events: &dyn Events) -> Result<Vec<DatabaseSync>> {
        let _gate = self.commit_gate.write().unwrap_or_else(|e| e.into_inner());
        let results = match self.backend.sync_databases() {
            Ok(results) => results,
            Err(e) => {
                for repo in self.registry.enabled() {
                    events.database_update_error(&repo.name, &e);
                }
                return Err(e);
            }
        };

        for sync in &results {
            if self.registry.get(&sync.repo).is_none() {
                debug!("Refreshed unregistered repository {}", sync.repo);
            }
            match &sync.status {
                SyncStatus::Updated => events.database_updated(&sync.repo),
                SyncStatus::UpToDate => events.database_up_to_date(&sync.repo),
                SyncStatus::Failed(message) => {
                    events.database_update_error(&sync.repo, &Error::DownloadError(message.clone()))
                }
            }
        }
        Ok(results)
    }

    /// Sync upgrades plus foreign packages with a newer AUR version
    pub fn upgradable(&self) -> Result<Vec<PackageRef>> {
        let _gate = self.read_gate();
        let mut upgrades = self.backend.query_upgradable()?;

        if let Some(aur) = self.aur.as_deref() {
            for local in self.backend.query_foreign()? {
                match aur.info(&local.name) {
                    Ok(remote) => {
                        if version::compare(&remote.version, &local.version) == Ordering::Greater {
                            upgrades.push(remote.to_ref());
                        }
                    }
                    Err(e) if e.is_not_found() => {
                        debug!("{} is not in the AUR", local.name);
                    }
                    Err(e) => {
                        warn!("Failed to check {} in the AUR: {}", local.name, e);
                        return Err(e);
                    }
                }
            }
        }

        upgrades.sort_by(|a, b| (a.source, &a.name).cmp(&(b.source, &b.name)));
        Ok(upgrades)
    }

    /// Dependencies no installed package requires any more
    pub fn unneeded_packages(&self) -> Result<Vec<PackageRef>> {
        let _gate = self.read_gate();
        self.backend.query_unneeded()
    }

    /// Installed package owning `path`, if any
    pub fn owner_of_file(&self, path: &Path) -> Result<Option<PackageRef>> {
        let _gate = self.read_gate();
        self.backend.query_owner(path)
    }

    /// Upgrade every package [`Session::upgradable`] reports, AUR included
    pub fn sys_upgrade(&self, events: &dyn Events) -> Result<TransactionSummary> {
        let upgrades = self.upgradable().inspect_err(|e| report_error(events, e))?;
        info!("System upgrade: {} packages", upgrades.len());

        let mut changeset = ChangeSet::new();
        for pkg in upgrades {
            changeset.mark_upgrade(pkg);
        }
        self.apply(&mut changeset, events)
    }

    /// Start a transaction reporting to `events`
    pub fn transaction<'s>(&'s self, events: &'s dyn Events) -> Transaction<'s> {
        Transaction::new(self, events)
    }

    /// Run the whole pipeline on `changeset`
    ///
    /// The lock is always released and the change set always cleared,
    /// whether or not the commit succeeded. Errors have already been
    /// reported to `events` when this returns.
    pub fn apply(&self, changeset: &mut ChangeSet, events: &dyn Events) -> Result<TransactionSummary> {
        self.apply_with_cancel(changeset, events, CancelToken::new())
    }

    pub fn apply_with_cancel(
        &self,
        changeset: &mut ChangeSet,
        events: &dyn Events,
        cancel: CancelToken,
    ) -> Result<TransactionSummary> {
        let mut tx = self.transaction(events).with_cancel(cancel);

        let result = tx
            .acquire()
            .and_then(|()| tx.set_targets(changeset).map(|_| ()))
            .and_then(|()| tx.prepare().map(|_| ()))
            .and_then(|()| tx.commit());

        tx.release();
        changeset.clear();

        result?;
        let summary = tx.summary();
        info!(
            "Transaction {} finished in {} ms",
            summary.id, summary.duration_ms
        );
        Ok(summary)
    }
}
