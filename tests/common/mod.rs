// tests/common/mod.rs

//! Shared test doubles for integration tests.
//!
//! The mocks keep their state behind an `Arc<Mutex<..>>`, so a test can hand
//! one clone to a `Session` and inspect the other afterwards.

#![allow(dead_code)]

use potluck::builder::{BuildJob, BuildState, PackageBuilder};
use potluck::{
    AurService, Backend, CancelToken, ChangeSet, Classification, Config, DatabaseSync, Error,
    Events, InstallReason, PackageRecord, PackageRef, ResolvedTransaction, Result, Rights,
    Session, Source, SyncStatus,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A mutating call received by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Install(Vec<String>),
    InstallFile(String),
    Remove(Vec<String>),
    MarkAsDeps(Vec<String>),
}

#[derive(Default)]
pub struct BackendState {
    /// name -> installed version
    pub installed: BTreeMap<String, String>,
    /// Local metadata beyond the version: dependencies, reason, files
    pub local: BTreeMap<String, PackageRecord>,
    pub sync: BTreeMap<String, PackageRecord>,
    pub groups: BTreeMap<String, Vec<String>>,
    pub foreign: Vec<PackageRef>,
    pub calls: Vec<Call>,
    pub fail_install: bool,
    pub sync_results: Vec<DatabaseSync>,
}

/// In-memory stand-in for pacman
#[derive(Clone, Default)]
pub struct MockBackend {
    pub state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installed(self, name: &str, version: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .installed
            .insert(name.to_string(), version.to_string());
        self
    }

    /// Install `name` with local metadata
    pub fn with_local(self, name: &str, version: &str, depends: &[&str], reason: InstallReason) -> Self {
        let mut record =
            PackageRecord::new(name, version, Source::Sync).with_depends(depends.iter().copied());
        record.install_reason = Some(reason);
        {
            let mut state = self.state.lock().unwrap();
            state.installed.insert(name.to_string(), version.to_string());
            state.local.insert(name.to_string(), record);
        }
        self
    }

    /// Give an installed package (registered with `with_local`) its file list
    pub fn with_files(self, name: &str, files: &[&str]) -> Self {
        if let Some(record) = self.state.lock().unwrap().local.get_mut(name) {
            record.files = files.iter().map(|f| f.to_string()).collect();
        }
        self
    }

    /// Add a sync package `name` with the given runtime dependencies
    pub fn with_sync(self, name: &str, version: &str, depends: &[&str]) -> Self {
        let record = PackageRecord::new(name, version, Source::Sync)
            .with_repo("extra")
            .with_depends(depends.iter().copied());
        self.state
            .lock()
            .unwrap()
            .sync
            .insert(name.to_string(), record);
        self
    }

    pub fn with_group(self, group: &str, members: &[&str]) -> Self {
        self.state.lock().unwrap().groups.insert(
            group.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub fn with_foreign(self, name: &str, version: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .foreign
            .push(PackageRef::aur(name, version));
        self
    }

    pub fn failing_install(self) -> Self {
        self.state.lock().unwrap().fail_install = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// True when no install, install-from-file or removal happened
    pub fn untouched(&self) -> bool {
        self.calls()
            .iter()
            .all(|c| matches!(c, Call::MarkAsDeps(_)))
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl Backend for MockBackend {
    fn query_installed(&self) -> Result<BTreeSet<String>> {
        Ok(self.state.lock().unwrap().installed.keys().cloned().collect())
    }

    fn query_info(&self, name: &str) -> Result<PackageRecord> {
        let state = self.state.lock().unwrap();
        let version = state
            .installed
            .get(name)
            .ok_or_else(|| Error::not_found(name))?;
        let mut record = state
            .local
            .get(name)
            .cloned()
            .unwrap_or_else(|| PackageRecord::new(name, version.as_str(), Source::Sync));
        record.installed = true;
        record.required_by = required_by(&state, name);
        Ok(record)
    }

    fn sync_info(&self, name: &str) -> Result<PackageRecord> {
        self.state
            .lock()
            .unwrap()
            .sync
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    fn search_sync(&self, term: &str) -> Result<Vec<PackageRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sync
            .values()
            .filter(|r| r.name.contains(term))
            .cloned()
            .collect())
    }

    fn group_members(&self, group: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .groups
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    fn local_group_members(&self, group: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .get(group)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| state.installed.contains_key(*m))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn query_upgradable(&self) -> Result<Vec<PackageRef>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .installed
            .iter()
            .filter_map(|(name, local)| {
                let candidate = state.sync.get(name)?;
                (potluck::version::compare(&candidate.version, local).is_gt())
                    .then(|| candidate.to_ref())
            })
            .collect())
    }

    fn query_foreign(&self) -> Result<Vec<PackageRef>> {
        Ok(self.state.lock().unwrap().foreign.clone())
    }

    fn query_unneeded(&self) -> Result<Vec<PackageRef>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .local
            .values()
            .filter(|r| state.installed.contains_key(&r.name))
            .filter(|r| r.install_reason == Some(InstallReason::Dependency))
            .filter(|r| required_by(&state, &r.name).is_empty())
            .map(PackageRecord::to_ref)
            .collect())
    }

    fn query_owner(&self, path: &Path) -> Result<Option<PackageRef>> {
        let path = path.to_string_lossy();
        let state = self.state.lock().unwrap();
        Ok(state
            .local
            .values()
            .find(|r| r.files.iter().any(|f| *f == path))
            .map(PackageRecord::to_ref))
    }

    fn sync_databases(&self) -> Result<Vec<DatabaseSync>> {
        Ok(self.state.lock().unwrap().sync_results.clone())
    }

    fn install(&self, names: &[String], _events: &dyn Events) -> Result<()> {
        self.record(Call::Install(names.to_vec()));
        let mut state = self.state.lock().unwrap();
        if state.fail_install {
            return Err(Error::BackendError {
                command: "pacman -S".to_string(),
                status: Some(1),
                stderr: "error: failed to commit transaction".to_string(),
            });
        }
        for name in names {
            let version = state
                .sync
                .get(name)
                .map(|r| r.version.clone())
                .unwrap_or_default();
            state.installed.insert(name.clone(), version);
        }
        Ok(())
    }

    fn install_from_file(&self, path: &Path, _events: &dyn Events) -> Result<()> {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(Call::InstallFile(file));
        Ok(())
    }

    fn remove(&self, names: &[String], _events: &dyn Events) -> Result<()> {
        self.record(Call::Remove(names.to_vec()));
        let mut state = self.state.lock().unwrap();
        for name in names {
            state.installed.remove(name);
        }
        Ok(())
    }

    fn mark_as_dependencies(&self, names: &[String]) -> Result<()> {
        self.record(Call::MarkAsDeps(names.to_vec()));
        Ok(())
    }
}

/// Installed packages whose local dependencies name `name`
fn required_by(state: &BackendState, name: &str) -> Vec<String> {
    state
        .local
        .values()
        .filter(|r| state.installed.contains_key(&r.name))
        .filter(|r| r.dependency_names().iter().any(|d| d == name))
        .map(|r| r.name.clone())
        .collect()
}

/// In-memory AUR; PKGBUILDs are generated from the registered records
#[derive(Clone, Default)]
pub struct MockAur {
    pub packages: Arc<Mutex<BTreeMap<String, PackageRecord>>>,
}

impl MockAur {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(self, name: &str, version: &str, depends: &[&str], makedepends: &[&str]) -> Self {
        let record = PackageRecord::new(name, version, Source::Aur)
            .with_repo("aur")
            .with_depends(depends.iter().copied())
            .with_build_depends(makedepends.iter().copied());
        self.packages
            .lock()
            .unwrap()
            .insert(name.to_string(), record);
        self
    }
}

fn quoted(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("'{}'", i))
        .collect::<Vec<_>>()
        .join(" ")
}

impl AurService for MockAur {
    fn search(&self, term: &str) -> Result<Vec<PackageRecord>> {
        Ok(self
            .packages
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.name.contains(term))
            .cloned()
            .collect())
    }

    fn info(&self, name: &str) -> Result<PackageRecord> {
        self.packages
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    fn fetch_pkgbuild(&self, name: &str) -> Result<String> {
        let record = self.info(name)?;
        Ok(format!(
            "pkgname={}\ndepends=({})\nmakedepends=({})\n",
            record.name,
            quoted(&record.depends),
            quoted(&record.build_depends)
        ))
    }

    fn fetch_snapshot(&self, name: &str) -> Result<Vec<u8>> {
        Err(Error::not_found(name))
    }
}

#[derive(Default)]
pub struct BuilderState {
    pub failing: BTreeSet<String>,
    pub built: Vec<String>,
    pub cleaned: Vec<String>,
    /// Backend calls made before each build started
    pub seen: Vec<(String, Vec<Call>)>,
}

/// Builder that writes an empty artifact instead of running makepkg
#[derive(Clone)]
pub struct FakeBuilder {
    dir: PathBuf,
    observed: Option<MockBackend>,
    pub state: Arc<Mutex<BuilderState>>,
}

impl FakeBuilder {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            observed: None,
            state: Arc::default(),
        }
    }

    pub fn failing(self, name: &str) -> Self {
        self.state.lock().unwrap().failing.insert(name.to_string());
        self
    }

    /// Record the backend calls `backend` has received whenever a build starts
    pub fn observing(mut self, backend: &MockBackend) -> Self {
        self.observed = Some(backend.clone());
        self
    }

    pub fn seen(&self) -> Vec<(String, Vec<Call>)> {
        self.state.lock().unwrap().seen.clone()
    }

    pub fn built(&self) -> Vec<String> {
        self.state.lock().unwrap().built.clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.state.lock().unwrap().cleaned.clone()
    }
}

impl PackageBuilder for FakeBuilder {
    fn prepare(&self, pkg: &PackageRef) -> Result<BuildJob> {
        let staging = self.dir.join(&pkg.name);
        fs::create_dir_all(&staging)?;
        Ok(BuildJob::new(pkg.clone(), staging))
    }

    fn build(&self, job: &mut BuildJob, cancel: &CancelToken) -> Result<PathBuf> {
        cancel.check("build")?;
        if let Some(backend) = &self.observed {
            let calls = backend.calls();
            self.state
                .lock()
                .unwrap()
                .seen
                .push((job.target.name.clone(), calls));
        }
        if self.state.lock().unwrap().failing.contains(&job.target.name) {
            job.state = BuildState::Failed;
            return Err(Error::BuildError {
                package: job.target.name.clone(),
                status: Some(1),
                message: "makepkg exited with 1".to_string(),
            });
        }

        let artifact = job.staging_dir.join(format!(
            "{}-{}-x86_64.pkg.tar.zst",
            job.target.name, job.target.version
        ));
        fs::write(&artifact, b"")?;
        job.state = BuildState::Built;
        job.artifact = Some(artifact.clone());
        self.state.lock().unwrap().built.push(job.target.name.clone());
        Ok(artifact)
    }

    fn cleanup(&self, job: BuildJob) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .cleaned
            .push(job.target.name.clone());
        if job.staging_dir.exists() {
            fs::remove_dir_all(&job.staging_dir)?;
        }
        Ok(())
    }
}

/// Event sink that records every event as a short string
pub struct RecordingEvents {
    pub log: Mutex<Vec<String>>,
    pub answer: bool,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            answer: false,
        }
    }

    /// Accept every question
    pub fn agreeing() -> Self {
        Self {
            answer: true,
            ..Self::new()
        }
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Failure events received
    pub fn failures(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with("failure:"))
            .collect()
    }
}

impl Events for RecordingEvents {
    fn start_installing_package(&self, pkg: &PackageRef) {
        self.push(format!("installing:{}", pkg.name));
    }
    fn done_installing_package(&self, pkg: &PackageRef) {
        self.push(format!("installed:{}", pkg.name));
    }
    fn start_upgrading_package(&self, pkg: &PackageRef) {
        self.push(format!("upgrading:{}", pkg.name));
    }
    fn done_upgrading_package(&self, pkg: &PackageRef, from_version: &str) {
        self.push(format!("upgraded:{}:{}", pkg.name, from_version));
    }
    fn start_removing_package(&self, pkg: &PackageRef) {
        self.push(format!("removing:{}", pkg.name));
    }
    fn done_removing_package(&self, pkg: &PackageRef) {
        self.push(format!("removed:{}", pkg.name));
    }
    fn reinstalling_package(&self, pkg: &PackageRef) {
        self.push(format!("reinstalling:{}", pkg.name));
    }

    fn ask_install_ignore_pkg(&self, pkg: &PackageRef) -> bool {
        self.push(format!("ask_ignore:{}", pkg.name));
        self.answer
    }
    fn ask_upgrade_local_newer(&self, pkg: &PackageRef, _installed_version: &str) -> bool {
        self.push(format!("ask_local_newer:{}", pkg.name));
        self.answer
    }
    fn ask_remove_hold_pkg(&self, pkg: &PackageRef) -> bool {
        self.push(format!("ask_hold:{}", pkg.name));
        self.answer
    }

    fn database_up_to_date(&self, repo: &str) {
        self.push(format!("db_up_to_date:{}", repo));
    }
    fn database_updated(&self, repo: &str) {
        self.push(format!("db_updated:{}", repo));
    }
    fn database_update_error(&self, repo: &str, _error: &Error) {
        self.push(format!("db_error:{}", repo));
    }

    fn done_transaction_init(&self) {
        self.push("init".to_string());
    }
    fn done_setting_targets(&self, _classification: &Classification) {
        self.push("targets_set".to_string());
    }
    fn done_transaction_prepare(&self, _resolved: &ResolvedTransaction) {
        self.push("prepared".to_string());
    }
    fn done_transaction_commit(&self) {
        self.push("committed".to_string());
    }
    fn done_transaction_release(&self) {
        self.push("released".to_string());
    }

    fn start_build(&self, pkg: &PackageRef) {
        self.push(format!("build:{}", pkg.name));
    }
    fn done_build(&self, pkg: &PackageRef, _artifact: &Path) {
        self.push(format!("built:{}", pkg.name));
    }
    fn done_build_directory_cleanup(&self, pkg: &PackageRef) {
        self.push(format!("cleanup:{}", pkg.name));
    }

    fn package_not_found(&self, error: &Error) {
        self.push(format!("failure:not_found:{}", error.missing_targets().join(",")));
    }
    fn unsatisfied_dependencies(&self, _error: &Error) {
        self.push("failure:unsatisfied".to_string());
    }
    fn file_conflict_detected(&self, _error: &Error) {
        self.push("failure:file_conflict".to_string());
    }
    fn conflicting_dependencies(&self, _error: &Error) {
        self.push("failure:conflicting".to_string());
    }
    fn nothing_to_be_done(&self, _error: &Error) {
        self.push("failure:nothing_to_be_done".to_string());
    }
    fn not_root(&self, _error: &Error) {
        self.push("failure:not_root".to_string());
    }
    fn build_problem(&self, _error: &Error) {
        self.push("failure:build".to_string());
    }
    fn user_abort(&self, _error: &Error) {
        self.push("failure:abort".to_string());
    }
    fn transaction_failed(&self, _error: &Error) {
        self.push("failure:transaction".to_string());
    }
}

/// Test fixture: a session over the mocks, with its lock and build
/// directories inside a temporary directory
pub struct Fixture {
    pub temp_dir: TempDir,
    pub backend: MockBackend,
    pub aur: MockAur,
    pub builder: FakeBuilder,
}

impl Fixture {
    pub fn new(backend: MockBackend, aur: MockAur) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let builder = FakeBuilder::new(&temp_dir.path().join("build"));
        Self {
            temp_dir,
            backend,
            aur,
            builder,
        }
    }

    pub fn with_builder(mut self, f: impl FnOnce(FakeBuilder) -> FakeBuilder) -> Self {
        self.builder = f(self.builder);
        self
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.options.lock_file = self.temp_dir.path().join("lock/potluck.lock");
        config.options.db_path = self.temp_dir.path().join("db");
        config.build.dir = self.temp_dir.path().join("build");
        config
    }

    pub fn session(&self) -> Session {
        self.session_with(self.config(), Rights::Root)
    }

    pub fn session_with(&self, config: Config, rights: Rights) -> Session {
        Session::from_parts(
            config,
            Box::new(self.backend.clone()),
            Some(Arc::new(self.aur.clone())),
            Box::new(self.builder.clone()),
            rights,
        )
    }
}

pub fn install(names: &[&str]) -> ChangeSet {
    let mut changeset = ChangeSet::new();
    for name in names {
        changeset.mark_install(PackageRef::sync(*name, ""));
    }
    changeset
}

pub fn db_status(repo: &str, status: SyncStatus) -> DatabaseSync {
    DatabaseSync {
        repo: repo.to_string(),
        status,
    }
}
