// src/builder/mod.rs

//! Building AUR packages from source
//!
//! A [`BuildJob`] moves through `Staged -> Building -> {Built | Failed}`.
//! The build tool's exit status is the only success signal; output is not
//! inspected. Builds are never retried.
//!
//! When running privileged, [`MakepkgBuilder`] hands the staging tree to the
//! configured build user and runs the build tool under that identity.
//! Building as uid 0 is refused.

use crate::aur::AurService;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::packages::PackageRef;
use crate::transaction::{CancelToken, Rights};
use flate2::read::GzDecoder;
use nix::unistd::User;
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use tar::Archive;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;
use walkdir::WalkDir;

/// Build job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Staged,
    Building,
    Built,
    Failed,
}

/// One AUR package being built
///
/// Dropping a job removes its staging directory if [`PackageBuilder::cleanup`]
/// did not already.
#[derive(Debug)]
pub struct BuildJob {
    pub target: PackageRef,
    pub staging_dir: PathBuf,
    pub pkgbuild: PathBuf,
    pub state: BuildState,
    pub artifact: Option<PathBuf>,
}

impl BuildJob {
    pub fn new(target: PackageRef, staging_dir: PathBuf) -> Self {
        let pkgbuild = staging_dir.join("PKGBUILD");
        Self {
            target,
            staging_dir,
            pkgbuild,
            state: BuildState::Staged,
            artifact: None,
        }
    }

    fn remove_staging(&self) -> Result<()> {
        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)?;
        }
        Ok(())
    }
}

impl Drop for BuildJob {
    fn drop(&mut self) {
        if let Err(e) = self.remove_staging() {
            warn!(
                "Failed to remove build directory {}: {}",
                self.staging_dir.display(),
                e
            );
        }
    }
}

/// Turns an AUR package into an installable artifact
pub trait PackageBuilder: Send + Sync {
    /// Stage the build files for `pkg`
    fn prepare(&self, pkg: &PackageRef) -> Result<BuildJob>;

    /// Run the build, returning the artifact path
    fn build(&self, job: &mut BuildJob, cancel: &CancelToken) -> Result<PathBuf>;

    /// Remove the staging directory
    fn cleanup(&self, job: BuildJob) -> Result<()> {
        job.remove_staging()
    }
}

/// Builds with `makepkg`
pub struct MakepkgBuilder {
    config: BuildConfig,
    aur: Option<Arc<dyn AurService>>,
    rights: Rights,
}

impl MakepkgBuilder {
    pub fn new(config: BuildConfig, aur: Option<Arc<dyn AurService>>, rights: Rights) -> Self {
        Self { config, aur, rights }
    }

    fn staging_dir(&self, name: &str) -> PathBuf {
        self.config.dir.join("aur").join(name)
    }

    /// Account the build tool runs as, `None` when already unprivileged
    fn build_user(&self, pkg: &str) -> Result<Option<User>> {
        if self.rights == Rights::User {
            return Ok(None);
        }

        let name = self.config.user.as_deref().ok_or_else(|| {
            Error::PermissionError(format!(
                "refusing to build {} as root: no build user configured",
                pkg
            ))
        })?;
        let user = User::from_name(name)
            .map_err(|e| Error::ConfigError(format!("Failed to look up user {}: {}", name, e)))?
            .ok_or_else(|| Error::ConfigError(format!("Build user {} does not exist", name)))?;

        if user.uid.is_root() {
            return Err(Error::PermissionError(format!(
                "refusing to build {} as root: build user {} has uid 0",
                pkg, name
            )));
        }
        Ok(Some(user))
    }

    fn wait(
        &self,
        job: &BuildJob,
        child: &mut std::process::Child,
        cancel: &CancelToken,
    ) -> Result<ExitStatus> {
        let interval = self.config.poll_interval();
        loop {
            if let Some(status) = child.wait_timeout(interval)? {
                return Ok(status);
            }
            if cancel.is_cancelled() {
                info!("Cancelling build of {}", job.target.name);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Cancelled(format!("build of {}", job.target.name)));
            }
        }
    }

    /// The package file for the target itself
    ///
    /// `<name>-<version>-*` wins; otherwise `<name>-` followed by a version,
    /// since VCS packages compute their version while building. Debug
    /// packages and other packages of a split PKGBUILD never match.
    fn find_artifact(&self, job: &BuildJob) -> Result<PathBuf> {
        let prefix = format!("{}-", job.target.name);
        let exact = format!("{}{}-", prefix, job.target.version);

        let mut candidates: Vec<PathBuf> = fs::read_dir(&job.staging_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&self.config.package_ext))
            })
            .collect();
        candidates.sort();

        let names: Vec<String> = candidates.iter().map(|p| file_name(p)).collect();
        let pick = names
            .iter()
            .position(|n| n.starts_with(&exact))
            .or_else(|| {
                names.iter().position(|n| {
                    n.strip_prefix(&prefix)
                        .and_then(|rest| rest.chars().next())
                        .is_some_and(|c| c.is_ascii_digit())
                })
            });

        pick.map(|i| candidates.swap_remove(i))
            .ok_or_else(|| Error::BuildError {
                package: job.target.name.clone(),
                status: Some(0),
                message: format!("no {}*{} file produced", prefix, self.config.package_ext),
            })
    }
}

impl PackageBuilder for MakepkgBuilder {
    fn prepare(&self, pkg: &PackageRef) -> Result<BuildJob> {
        let staging = self.staging_dir(&pkg.name);
        if staging.exists() {
            debug!("Removing stale build directory {}", staging.display());
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        let job = BuildJob::new(pkg.clone(), staging);

        let aur = self.aur.as_deref().ok_or_else(|| Error::not_found(&pkg.name))?;
        if self.config.use_snapshot {
            let snapshot = aur.fetch_snapshot(&pkg.name)?;
            unpack_snapshot(&snapshot, &job.staging_dir)?;
        } else {
            fs::write(&job.pkgbuild, aur.fetch_pkgbuild(&pkg.name)?)?;
        }

        if !job.pkgbuild.is_file() {
            return Err(Error::BuildError {
                package: pkg.name.clone(),
                status: None,
                message: "build files contain no PKGBUILD".to_string(),
            });
        }

        info!("Staged {} in {}", pkg.name, job.staging_dir.display());
        Ok(job)
    }

    fn build(&self, job: &mut BuildJob, cancel: &CancelToken) -> Result<PathBuf> {
        if job.state != BuildState::Staged {
            return Err(Error::InvalidState(format!(
                "build of {} is {:?}, expected Staged",
                job.target.name, job.state
            )));
        }
        cancel.check("build")?;

        let result = self.run_build(job, cancel);
        match &result {
            Ok(artifact) => {
                job.state = BuildState::Built;
                job.artifact = Some(artifact.clone());
            }
            Err(_) => job.state = BuildState::Failed,
        }
        result
    }
}

impl MakepkgBuilder {
    fn run_build(&self, job: &mut BuildJob, cancel: &CancelToken) -> Result<PathBuf> {
        let name = job.target.name.clone();
        let user = self.build_user(&name)?;

        let mut cmd = Command::new(&self.config.makepkg);
        if self.config.force {
            cmd.arg("-f");
        }
        cmd.arg("--noconfirm")
            .current_dir(&job.staging_dir)
            .env("PKGDEST", &job.staging_dir)
            .stdin(Stdio::null());

        if self.config.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        if let Some(user) = &user {
            chown_tree(&job.staging_dir, user)?;
            cmd.uid(user.uid.as_raw())
                .gid(user.gid.as_raw())
                .env("HOME", &user.dir)
                .env("USER", &user.name);
            debug!("Building {} as {}", name, user.name);
        }

        let mut child = cmd.spawn().map_err(|e| Error::BuildError {
            package: name.clone(),
            status: None,
            message: format!("failed to run {}: {}", self.config.makepkg, e),
        })?;
        job.state = BuildState::Building;
        info!("Building {}", name);

        let status = self.wait(job, &mut child, cancel)?;
        if !status.success() {
            return Err(Error::BuildError {
                package: name,
                status: status.code(),
                message: format!("{} exited with {}", self.config.makepkg, status),
            });
        }

        self.find_artifact(job)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Hand the staging tree to the build user
fn chown_tree(root: &Path, user: &User) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::IoError(e.into()))?;
        std::os::unix::fs::lchown(entry.path(), Some(user.uid.as_raw()), Some(user.gid.as_raw()))?;
    }
    Ok(())
}

/// Unpack an AUR snapshot (`<pkgbase>/...` in a gzipped tar) into `dest`,
/// dropping the leading directory
///
/// Hard links, symlinks pointing outside the tree and entries written
/// through an already unpacked symlink are refused.
fn unpack_snapshot(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let mut components = path.components();
        components.next();
        let relative: PathBuf = components.collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(unsafe_entry(&path, "path leaves the snapshot"));
        }

        let kind = entry.header().entry_type();
        if kind.is_hard_link() {
            return Err(unsafe_entry(&path, "hard link"));
        }
        if kind.is_symlink() {
            let link = entry
                .link_name()?
                .ok_or_else(|| unsafe_entry(&path, "symlink without target"))?;
            if link.is_absolute() || link.components().any(|c| c == Component::ParentDir) {
                return Err(unsafe_entry(&path, "symlink leaves the snapshot"));
            }
        }
        if through_symlink(dest, &relative) {
            return Err(unsafe_entry(&path, "written through a symlink"));
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

fn unsafe_entry(path: &Path, reason: &str) -> Error {
    Error::ParseError(format!("Unsafe entry in snapshot: {} ({})", path.display(), reason))
}

/// True when `relative` or one of its parents under `dest` is a symlink
fn through_symlink(dest: &Path, relative: &Path) -> bool {
    let mut current = dest.to_path_buf();
    relative.components().any(|c| {
        current.push(c);
        fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink())
    })
}
