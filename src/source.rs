// src/source.rs

//! Package source adapter
//!
//! Presents the sync databases and the AUR as one searchable catalogue.
//! Records are fetched live on every call; nothing is cached, so a package
//! that appears between two lookups is found by the second one.

use crate::aur::{AurService, BuildDependencies, DependencyExtractor};
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::packages::{PackageRecord, Source};
use crate::transaction::CancelToken;
use std::collections::BTreeSet;
use tracing::debug;

/// Read-only view over both package origins
pub struct PackageSources<'a> {
    backend: &'a dyn Backend,
    aur: Option<&'a dyn AurService>,
    extractor: &'a dyn DependencyExtractor,
    cancel: CancelToken,
}

impl<'a> PackageSources<'a> {
    /// `aur` is `None` when the AUR is disabled
    pub fn new(
        backend: &'a dyn Backend,
        aur: Option<&'a dyn AurService>,
        extractor: &'a dyn DependencyExtractor,
    ) -> Self {
        Self {
            backend,
            aur,
            extractor,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a cancel token checked around every AUR call
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend
    }

    fn aur_call<T>(&self, what: &str, f: impl FnOnce(&dyn AurService) -> Result<T>) -> Option<Result<T>> {
        let aur = self.aur?;
        Some(
            self.cancel
                .check(what)
                .and_then(|()| f(aur))
                .and_then(|value| self.cancel.check(what).map(|()| value)),
        )
    }

    /// Search both sources; duplicate names across sources are kept
    pub fn search(&self, query: &str) -> Result<Vec<PackageRecord>> {
        let installed = self.backend.query_installed()?;
        let mut results = self.backend.search_sync(query)?;

        if let Some(aur_results) = self.aur_call("AUR search", |aur| aur.search(query)) {
            results.extend(aur_results?);
        }

        for record in &mut results {
            record.installed = installed.contains(&record.name);
        }
        results.sort_by(|a, b| (a.source, &a.name).cmp(&(b.source, &b.name)));

        debug!("Search for '{}' matched {} packages", query, results.len());
        Ok(results)
    }

    /// Live lookup of one package in one source
    pub fn info(&self, name: &str, source: Source) -> Result<PackageRecord> {
        let mut record = self.record(name, source)?;
        record.installed = self.is_installed(name)?;
        Ok(record)
    }

    /// Like [`info`](Self::info) without filling in the installed flag
    pub fn record(&self, name: &str, source: Source) -> Result<PackageRecord> {
        let mut record = match source {
            Source::Sync => self.backend.sync_info(name)?,
            Source::Aur => self
                .aur_call("AUR lookup", |aur| aur.info(name))
                .unwrap_or_else(|| Err(Error::not_found(name)))?,
        };
        record.source = Some(source);
        Ok(record)
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.backend.query_installed()?.contains(name))
    }

    pub fn installed(&self) -> Result<BTreeSet<String>> {
        self.backend.query_installed()
    }

    /// Sync first, then AUR; `NotFoundError` when neither has `name`
    pub fn lookup(&self, name: &str) -> Result<PackageRecord> {
        match self.backend.sync_info(name) {
            Ok(mut record) => {
                record.source = Some(Source::Sync);
                Ok(record)
            }
            Err(e) if e.is_not_found() => {
                debug!("{} not in sync repositories, trying AUR", name);
                self.record(name, Source::Aur)
            }
            Err(e) => Err(e),
        }
    }

    /// Runtime and build dependencies declared by an AUR package's PKGBUILD
    pub fn build_dependencies(&self, name: &str) -> Result<BuildDependencies> {
        let pkgbuild = self
            .aur_call("PKGBUILD download", |aur| aur.fetch_pkgbuild(name))
            .unwrap_or_else(|| Err(Error::not_found(name)))?;
        self.extractor.extract(&pkgbuild)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aur::InlineExtractor;
    use crate::backend::DatabaseSync;
    use crate::events::Events;
    use crate::packages::PackageRef;
    use std::path::Path;

    struct FakeSync;

    impl Backend for FakeSync {
        fn query_installed(&self) -> Result<BTreeSet<String>> {
            Ok(["glibc".to_string()].into())
        }
        fn query_info(&self, name: &str) -> Result<PackageRecord> {
            Err(Error::not_found(name))
        }
        fn sync_info(&self, name: &str) -> Result<PackageRecord> {
            match name {
                "glibc" | "zlib" => Ok(PackageRecord::new(name, "1-1", Source::Sync)),
                _ => Err(Error::not_found(name)),
            }
        }
        fn search_sync(&self, _term: &str) -> Result<Vec<PackageRecord>> {
            Ok(vec![
                PackageRecord::new("zlib", "1-1", Source::Sync),
                PackageRecord::new("glibc", "1-1", Source::Sync),
            ])
        }
        fn group_members(&self, _group: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn local_group_members(&self, _group: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn query_upgradable(&self) -> Result<Vec<PackageRef>> {
            Ok(Vec::new())
        }
        fn query_foreign(&self) -> Result<Vec<PackageRef>> {
            Ok(Vec::new())
        }
        fn query_unneeded(&self) -> Result<Vec<PackageRef>> {
            Ok(Vec::new())
        }
        fn query_owner(&self, _path: &Path) -> Result<Option<PackageRef>> {
            Ok(None)
        }
        fn sync_databases(&self) -> Result<Vec<DatabaseSync>> {
            Ok(Vec::new())
        }
        fn install(&self, _names: &[String], _events: &dyn Events) -> Result<()> {
            Ok(())
        }
        fn install_from_file(&self, _path: &Path, _events: &dyn Events) -> Result<()> {
            Ok(())
        }
        fn remove(&self, _names: &[String], _events: &dyn Events) -> Result<()> {
            Ok(())
        }
        fn mark_as_dependencies(&self, _names: &[String]) -> Result<()> {
            Ok(())
        }
    }

    struct FakeAur;

    impl AurService for FakeAur {
        fn search(&self, _term: &str) -> Result<Vec<PackageRecord>> {
            Ok(vec![PackageRecord::new("zlib", "2-1", Source::Aur)])
        }
        fn info(&self, name: &str) -> Result<PackageRecord> {
            match name {
                "yay" => Ok(PackageRecord::new("yay", "12-1", Source::Aur)),
                _ => Err(Error::not_found(name)),
            }
        }
        fn fetch_pkgbuild(&self, _name: &str) -> Result<String> {
            Ok("depends=('git')\nmakedepends=('go')\n".to_string())
        }
        fn fetch_snapshot(&self, name: &str) -> Result<Vec<u8>> {
            Err(Error::not_found(name))
        }
    }

    #[test]
    fn test_search_merges_and_keeps_duplicates() {
        let sources = PackageSources::new(&FakeSync, Some(&FakeAur), &InlineExtractor);
        let results = sources.search("z").unwrap();

        let keys: Vec<(Source, &str)> = results
            .iter()
            .map(|r| (r.source.unwrap(), r.name.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Source::Sync, "glibc"),
                (Source::Sync, "zlib"),
                (Source::Aur, "zlib")
            ]
        );
        assert!(results[0].installed);
        assert!(!results[1].installed);
    }

    #[test]
    fn test_disabled_aur() {
        let sources = PackageSources::new(&FakeSync, None, &InlineExtractor);
        assert_eq!(sources.search("z").unwrap().len(), 2);
        assert!(sources.lookup("yay").unwrap_err().is_not_found());
        assert!(sources.build_dependencies("yay").unwrap_err().is_not_found());
    }

    #[test]
    fn test_lookup_falls_back_to_aur() {
        let sources = PackageSources::new(&FakeSync, Some(&FakeAur), &InlineExtractor);
        assert_eq!(sources.lookup("zlib").unwrap().source, Some(Source::Sync));
        assert_eq!(sources.lookup("yay").unwrap().source, Some(Source::Aur));
        assert_eq!(
            sources.lookup("missing").unwrap_err().missing_targets(),
            ["missing"]
        );
    }

    #[test]
    fn test_build_dependencies() {
        let sources = PackageSources::new(&FakeSync, Some(&FakeAur), &InlineExtractor);
        let deps = sources.build_dependencies("yay").unwrap();
        assert_eq!(deps.depends, vec!["git"]);
        assert_eq!(deps.makedepends, vec!["go"]);
    }

    #[test]
    fn test_cancelled_aur_call() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let sources = PackageSources::new(&FakeSync, Some(&FakeAur), &InlineExtractor).with_cancel(cancel);
        assert!(matches!(
            sources.info("yay", Source::Aur),
            Err(Error::Cancelled(_))
        ));
    }
}
