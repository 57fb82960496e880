// src/packages/mod.rs

//! Package identity and metadata
//!
//! `PackageRef` names a package in one origin; `PackageRecord` carries its
//! eagerly fetched metadata. Both are plain values with no tie to a backend
//! handle, so they can outlive the query that produced them.

use crate::version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Origin of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Native repository database (core, extra, ...)
    Sync,
    /// Arch User Repository, built locally from a PKGBUILD
    Aur,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Aur => "aur",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a package is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallReason {
    Explicit,
    Dependency,
}

/// Identifies a package within one source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub source: Source,
    pub version: String,
    /// Repository the package comes from ("core", "extra", "aur", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, source: Source, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            version: version.into(),
            repo: None,
        }
    }

    pub fn sync(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, Source::Sync, version)
    }

    pub fn aur(name: impl Into<String>, version: impl Into<String>) -> Self {
        let mut pkg = Self::new(name, Source::Aur, version);
        pkg.repo = Some("aur".to_string());
        pkg
    }

    /// Set the repository name
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn is_aur(&self) -> bool {
        self.source == Source::Aur
    }

    /// Compare versions with pacman semantics
    pub fn compare_version(&self, other: &PackageRef) -> Ordering {
        version::compare(&self.version, &other.version)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repo = self.repo.as_deref().unwrap_or(self.source.as_str());
        write!(f, "{}/{} {}", repo, self.name, self.version)
    }
}

/// Full metadata for a package, populated once per query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub source: Option<Source>,
    pub repo: Option<String>,
    pub description: Option<String>,
    /// Installed size for local packages, download size otherwise
    pub size: Option<u64>,
    /// Only known for installed packages
    pub install_reason: Option<InstallReason>,
    /// Declared runtime dependencies, constraints included
    #[serde(default)]
    pub depends: Vec<String>,
    /// Build-time dependencies (AUR only)
    #[serde(default)]
    pub build_depends: Vec<String>,
    /// Installed packages depending on this one
    #[serde(default)]
    pub required_by: Vec<String>,
    /// Files owned by the package (installed packages only)
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub installed: bool,
    /// AUR: flagged out of date by a user
    #[serde(default)]
    pub out_of_date: bool,
    /// AUR: number of votes
    pub votes: Option<u64>,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: Some(source),
            ..Default::default()
        }
    }

    /// Builder-style helper for dependencies
    pub fn with_depends<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style helper for build dependencies
    pub fn with_build_depends<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_depends = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Reference to this record; records without a source are treated as sync
    pub fn to_ref(&self) -> PackageRef {
        PackageRef {
            name: self.name.clone(),
            source: self.source.unwrap_or(Source::Sync),
            version: self.version.clone(),
            repo: self.repo.clone(),
        }
    }

    /// Bare dependency names, constraints stripped
    pub fn dependency_names(&self) -> Vec<String> {
        self.depends.iter().map(|d| version::dependency_name(d)).collect()
    }

    pub fn build_dependency_names(&self) -> Vec<String> {
        self.build_depends
            .iter()
            .map(|d| version::dependency_name(d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_ref_display() {
        let pkg = PackageRef::sync("xterm", "397-1").with_repo("extra");
        assert_eq!(pkg.to_string(), "extra/xterm 397-1");

        let aur = PackageRef::aur("yay", "12.3.5-1");
        assert_eq!(aur.to_string(), "aur/yay 12.3.5-1");
        assert!(aur.is_aur());
    }

    #[test]
    fn test_record_dependency_names() {
        let rec = PackageRecord::new("foo", "1.0-1", Source::Aur)
            .with_depends(["glibc>=2.38", "bar"])
            .with_build_depends(["cmake", "ninja<2"]);
        assert_eq!(rec.dependency_names(), vec!["glibc", "bar"]);
        assert_eq!(rec.build_dependency_names(), vec!["cmake", "ninja"]);
        assert_eq!(rec.to_ref().source, Source::Aur);
    }

    #[test]
    fn test_compare_version() {
        let old = PackageRef::sync("foo", "1.0-1");
        let new = PackageRef::sync("foo", "1.0-2");
        assert_eq!(old.compare_version(&new), Ordering::Less);
    }
}
