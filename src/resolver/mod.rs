// src/resolver/mod.rs

//! Dependency resolution
//!
//! Expands a [`Classification`] into the full set of packages a commit has
//! to add. Resolution is a work-stack closure over declared dependencies:
//!
//! - every install/upgrade target is expanded, installed or not
//! - a dependency already installed, already a target, or already resolved
//!   is not expanded again, which also makes cycles terminate
//! - AUR packages contribute their PKGBUILD's build-time dependencies
//! - version constraints do not steer resolution; a dependency whose
//!   candidate or installed version misses its constraint is logged and
//!   kept in [`ResolvedTransaction::version_mismatches`], and pacman has the
//!   final word when the packages are installed
//!
//! Any dependency missing from both sources fails the whole resolution.

mod graph;

pub use graph::{DepKind, DependencyEdge, DependencyGraph};

use crate::changeset::Classification;
use crate::error::{Error, Result};
use crate::packages::{PackageRecord, PackageRef, Source};
use crate::source::PackageSources;
use crate::version::{DependencySpec, PkgVersion, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A declared version constraint the chosen package does not meet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMismatch {
    /// Package declaring the dependency
    pub package: String,
    /// Dependency as declared, e.g. `glibc>=2.40`
    pub dependency: String,
    /// Version that is installed or about to be
    pub found: String,
}

/// Dependency-closed set of changes, ready to commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTransaction {
    pub classification: Classification,
    /// Pulled in and needed at run time
    pub resolved_dependencies: BTreeMap<String, PackageRef>,
    /// Pulled in and needed only to build AUR packages
    pub resolved_build_dependencies: BTreeMap<String, PackageRef>,
    /// Every package to add, dependencies before dependents
    pub install_order: Vec<PackageRef>,
    /// Direct dependencies of each package to add, limited to packages to add
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub version_mismatches: Vec<VersionMismatch>,
}

impl ResolvedTransaction {
    /// Installs + upgrades + resolved dependencies of both kinds
    pub fn add_count(&self) -> usize {
        self.classification.install_count()
            + self.resolved_dependencies.len()
            + self.resolved_build_dependencies.len()
    }

    pub fn remove_count(&self) -> usize {
        self.classification.removes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.add_count() == 0 && self.remove_count() == 0
    }

    /// Pulled in rather than requested
    pub fn is_dependency(&self, name: &str) -> bool {
        self.resolved_dependencies.contains_key(name)
            || self.resolved_build_dependencies.contains_key(name)
    }

    pub fn removes(&self) -> Vec<PackageRef> {
        self.classification.removes.values().cloned().collect()
    }

    /// Packages that must be installed before some AUR package is built
    ///
    /// Everything an AUR package depends on, directly or through other
    /// packages being added, at run time or build time.
    pub fn build_prerequisites(&self) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .install_order
            .iter()
            .filter(|p| p.is_aur())
            .flat_map(|p| self.direct_dependencies(&p.name))
            .collect();

        while let Some(name) = stack.pop() {
            if seen.insert(name.to_string()) {
                stack.extend(self.direct_dependencies(name));
            }
        }
        seen
    }

    fn direct_dependencies<'r>(&'r self, name: &str) -> impl Iterator<Item = &'r str> + use<'r> {
        self.dependencies
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

/// Resolves dependencies against both package sources
pub struct Resolver<'s, 'a> {
    sources: &'s PackageSources<'a>,
}

impl<'s, 'a> Resolver<'s, 'a> {
    pub fn new(sources: &'s PackageSources<'a>) -> Self {
        Self { sources }
    }

    pub fn resolve(&self, classification: &Classification) -> Result<ResolvedTransaction> {
        let installed = self.sources.installed()?;
        let mut mismatches = Vec::new();
        let mut graph = DependencyGraph::new();
        let mut nodes: BTreeMap<String, PackageRef> = BTreeMap::new();
        let mut stack: Vec<PackageRecord> = Vec::new();

        // Reverse so targets pop in classification order
        let targets: Vec<&PackageRef> = classification.targets().collect();
        for target in targets.iter().rev() {
            let record = self.sources.record(&target.name, target.source)?;
            nodes.insert(target.name.clone(), (*target).clone());
            stack.push(record);
        }

        while let Some(record) = stack.pop() {
            let (depends, build_depends) = self.declared_dependencies(&record)?;
            let edges = depends
                .into_iter()
                .map(|d| (d, DepKind::Runtime))
                .chain(build_depends.into_iter().map(|d| (d, DepKind::Build)));

            for (spec, kind) in edges {
                let dep = spec.name.clone();
                if classification.removes.contains_key(&dep) {
                    return Err(Error::ConflictingDependenciesError(format!(
                        "{} depends on {}, which is marked for removal",
                        record.name, dep
                    )));
                }
                if let Some(node) = nodes.get(&dep) {
                    mismatches.extend(unmet_constraint(&record.name, &spec, &node.version));
                    graph.add_edge(&record.name, &dep, kind);
                    continue;
                }
                if installed.contains(&dep) {
                    if spec.constraint != VersionConstraint::Any {
                        let local = self.sources.backend().query_info(&dep)?;
                        mismatches.extend(unmet_constraint(&record.name, &spec, &local.version));
                    }
                    continue;
                }
                graph.add_edge(&record.name, &dep, kind);

                let dep_record = self.sources.lookup(&dep).map_err(|e| {
                    if e.is_not_found() {
                        Error::not_found(dep.clone())
                    } else {
                        e
                    }
                })?;
                debug!("{} pulls in {} ({:?})", record.name, dep_record.to_ref(), kind);
                mismatches.extend(unmet_constraint(&record.name, &spec, &dep_record.version));
                nodes.insert(dep.clone(), dep_record.to_ref());
                stack.push(dep_record);
            }
        }

        let roots: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        let runtime = graph.runtime_closure(roots.iter().copied());

        let mut resolved = ResolvedTransaction {
            classification: classification.clone(),
            version_mismatches: mismatches,
            ..Default::default()
        };
        for (name, pkg) in &nodes {
            let deps: Vec<String> = graph
                .dependencies(name)
                .iter()
                .map(|e| e.to.clone())
                .collect();
            if !deps.is_empty() {
                resolved.dependencies.insert(name.clone(), deps);
            }

            if classification.is_target(name) {
                continue;
            }
            if runtime.contains(name) {
                resolved.resolved_dependencies.insert(name.clone(), pkg.clone());
            } else {
                resolved
                    .resolved_build_dependencies
                    .insert(name.clone(), pkg.clone());
            }
        }

        resolved.install_order = graph
            .install_order(roots.iter().copied(), |name| nodes.contains_key(name))
            .into_iter()
            .filter_map(|name| nodes.get(&name).cloned())
            .collect();

        info!(
            "Resolved {} targets: {} runtime and {} build dependencies",
            roots.len(),
            resolved.resolved_dependencies.len(),
            resolved.resolved_build_dependencies.len()
        );
        Ok(resolved)
    }

    /// Runtime and build dependencies of one package
    ///
    /// AUR packages merge the RPC metadata with their PKGBUILD's arrays.
    fn declared_dependencies(
        &self,
        record: &PackageRecord,
    ) -> Result<(Vec<DependencySpec>, Vec<DependencySpec>)> {
        let mut depends = record.depends.clone();
        let mut build_depends = record.build_depends.clone();

        if record.source == Some(Source::Aur) {
            let extracted = self.sources.build_dependencies(&record.name)?;
            depends.extend(extracted.depends);
            build_depends.extend(extracted.makedepends);
        }

        Ok((dedup(&depends), dedup(&build_depends)))
    }
}

/// Parse declared dependencies, keeping the first occurrence of each name
fn dedup(raw: &[String]) -> Vec<DependencySpec> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .map(|d| DependencySpec::parse(d))
        .filter(|spec| !spec.name.is_empty() && seen.insert(spec.name.clone()))
        .collect()
}

/// `Some` when `found` does not meet the constraint in `spec`
fn unmet_constraint(package: &str, spec: &DependencySpec, found: &str) -> Option<VersionMismatch> {
    if spec.constraint == VersionConstraint::Any {
        return None;
    }
    let version = PkgVersion::parse(found).ok()?;
    if spec.constraint.satisfies(&version) {
        return None;
    }

    let dependency = format!("{}{}", spec.name, spec.constraint);
    warn!("{} requires {}, but {} {} was found", package, dependency, spec.name, found);
    Some(VersionMismatch {
        package: package.to_string(),
        dependency,
        found: found.to_string(),
    })
}
