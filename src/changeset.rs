// src/changeset.rs

//! Pending user intents
//!
//! A [`ChangeSet`] records what the user wants to happen before anything is
//! committed. Each package name lives in at most one of the install, upgrade
//! and remove mappings; every mutation moves the name atomically.
//!
//! A [`Classification`] is the same intent partitioned by package origin,
//! produced when a transaction's targets are set.

use crate::packages::{PackageRef, Source};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the user wants done with one package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Install,
    Upgrade,
    Remove,
}

/// Mutable set of pending intents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    installs: BTreeMap<String, PackageRef>,
    upgrades: BTreeMap<String, PackageRef>,
    removes: BTreeMap<String, PackageRef>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn mapping(&mut self, intent: Intent) -> &mut BTreeMap<String, PackageRef> {
        match intent {
            Intent::Install => &mut self.installs,
            Intent::Upgrade => &mut self.upgrades,
            Intent::Remove => &mut self.removes,
        }
    }

    /// Record `intent` for `pkg`, dropping any other intent for the same name
    pub fn mark(&mut self, pkg: PackageRef, intent: Intent) {
        self.unmark(&pkg.name);
        self.mapping(intent).insert(pkg.name.clone(), pkg);
    }

    pub fn mark_install(&mut self, pkg: PackageRef) {
        self.mark(pkg, Intent::Install);
    }

    pub fn mark_upgrade(&mut self, pkg: PackageRef) {
        self.mark(pkg, Intent::Upgrade);
    }

    pub fn mark_remove(&mut self, pkg: PackageRef) {
        self.mark(pkg, Intent::Remove);
    }

    /// Forget any intent for `name`, returning what was recorded
    pub fn unmark(&mut self, name: &str) -> Option<(Intent, PackageRef)> {
        [Intent::Install, Intent::Upgrade, Intent::Remove]
            .into_iter()
            .find_map(|intent| self.mapping(intent).remove(name).map(|pkg| (intent, pkg)))
    }

    /// Flip `intent` for `pkg`: unmark if already recorded with that intent,
    /// otherwise mark it. Returns whether the intent is now set.
    pub fn toggle(&mut self, pkg: PackageRef, intent: Intent) -> bool {
        if self.intent_of(&pkg.name) == Some(intent) {
            self.unmark(&pkg.name);
            false
        } else {
            self.mark(pkg, intent);
            true
        }
    }

    pub fn intent_of(&self, name: &str) -> Option<Intent> {
        if self.installs.contains_key(name) {
            Some(Intent::Install)
        } else if self.upgrades.contains_key(name) {
            Some(Intent::Upgrade)
        } else if self.removes.contains_key(name) {
            Some(Intent::Remove)
        } else {
            None
        }
    }

    pub fn installs(&self) -> &BTreeMap<String, PackageRef> {
        &self.installs
    }

    pub fn upgrades(&self) -> &BTreeMap<String, PackageRef> {
        &self.upgrades
    }

    pub fn removes(&self) -> &BTreeMap<String, PackageRef> {
        &self.removes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.installs.len() + self.upgrades.len() + self.removes.len()
    }

    pub fn clear(&mut self) {
        self.installs.clear();
        self.upgrades.clear();
        self.removes.clear();
    }
}

/// A change set partitioned by origin and action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub sync_installs: BTreeMap<String, PackageRef>,
    pub aur_installs: BTreeMap<String, PackageRef>,
    pub sync_upgrades: BTreeMap<String, PackageRef>,
    pub aur_upgrades: BTreeMap<String, PackageRef>,
    pub removes: BTreeMap<String, PackageRef>,
    /// Group name -> members it expanded to
    #[serde(default)]
    pub expanded_groups: BTreeMap<String, Vec<String>>,
}

impl Classification {
    /// File `pkg` under the partition for its source and `intent`
    pub fn insert(&mut self, pkg: PackageRef, intent: Intent) {
        let map = match (intent, pkg.source) {
            (Intent::Install, Source::Sync) => &mut self.sync_installs,
            (Intent::Install, Source::Aur) => &mut self.aur_installs,
            (Intent::Upgrade, Source::Sync) => &mut self.sync_upgrades,
            (Intent::Upgrade, Source::Aur) => &mut self.aur_upgrades,
            (Intent::Remove, _) => &mut self.removes,
        };
        map.insert(pkg.name.clone(), pkg);
    }

    /// Install and upgrade targets, sync before AUR, each ordered by name
    pub fn targets(&self) -> impl Iterator<Item = &PackageRef> {
        self.sync_installs
            .values()
            .chain(self.sync_upgrades.values())
            .chain(self.aur_installs.values())
            .chain(self.aur_upgrades.values())
    }

    pub fn is_target(&self, name: &str) -> bool {
        self.sync_installs.contains_key(name)
            || self.aur_installs.contains_key(name)
            || self.sync_upgrades.contains_key(name)
            || self.aur_upgrades.contains_key(name)
    }

    pub fn is_upgrade(&self, name: &str) -> bool {
        self.sync_upgrades.contains_key(name) || self.aur_upgrades.contains_key(name)
    }

    pub fn install_count(&self) -> usize {
        self.sync_installs.len()
            + self.aur_installs.len()
            + self.sync_upgrades.len()
            + self.aur_upgrades.len()
    }

    pub fn len(&self) -> usize {
        self.install_count() + self.removes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names filed under more than one partition, sorted
    pub fn overlapping(&self) -> Vec<String> {
        let partitions = [
            &self.sync_installs,
            &self.aur_installs,
            &self.sync_upgrades,
            &self.aur_upgrades,
            &self.removes,
        ];
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in partitions.iter().flat_map(|p| p.keys()) {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str) -> PackageRef {
        PackageRef::sync(name, "1.0-1")
    }

    fn assert_one_mapping(cs: &ChangeSet) {
        for name in cs.installs().keys() {
            assert!(!cs.upgrades().contains_key(name));
            assert!(!cs.removes().contains_key(name));
        }
        for name in cs.upgrades().keys() {
            assert!(!cs.removes().contains_key(name));
        }
    }

    #[test]
    fn test_mark_moves_between_mappings() {
        let mut cs = ChangeSet::new();
        cs.mark_install(pkg("foo"));
        cs.mark_remove(pkg("foo"));
        assert_eq!(cs.intent_of("foo"), Some(Intent::Remove));
        assert_eq!(cs.len(), 1);
        assert_one_mapping(&cs);
    }

    #[test]
    fn test_toggle_sequences_keep_invariant() {
        let mut cs = ChangeSet::new();
        let intents = [Intent::Install, Intent::Upgrade, Intent::Remove];
        let names = ["a", "b", "c"];

        for step in 0..30 {
            let name = names[step % names.len()];
            let intent = intents[(step / 2) % intents.len()];
            cs.toggle(pkg(name), intent);
            assert_one_mapping(&cs);
            assert!(cs.len() <= names.len());
        }
    }

    #[test]
    fn test_toggle_twice_unmarks() {
        let mut cs = ChangeSet::new();
        assert!(cs.toggle(pkg("foo"), Intent::Install));
        assert!(!cs.toggle(pkg("foo"), Intent::Install));
        assert!(cs.is_empty());
    }

    #[test]
    fn test_unmark_and_clear() {
        let mut cs = ChangeSet::new();
        cs.mark_upgrade(pkg("foo"));
        cs.mark_install(pkg("bar"));

        let (intent, removed) = cs.unmark("foo").unwrap();
        assert_eq!(intent, Intent::Upgrade);
        assert_eq!(removed.name, "foo");
        assert!(cs.unmark("foo").is_none());

        cs.clear();
        assert!(cs.is_empty());
    }

    #[test]
    fn test_classification_partitions() {
        let mut c = Classification::default();
        c.insert(PackageRef::sync("xterm", "397-1"), Intent::Install);
        c.insert(PackageRef::aur("yay", "12-1"), Intent::Install);
        c.insert(PackageRef::aur("paru", "2-1"), Intent::Upgrade);
        c.insert(PackageRef::aur("old", "1-1"), Intent::Remove);

        assert_eq!(c.len(), 4);
        assert_eq!(c.install_count(), 3);
        assert!(c.is_target("paru"));
        assert!(c.is_upgrade("paru"));
        assert!(!c.is_target("old"));

        let names: Vec<&str> = c.targets().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["xterm", "yay", "paru"]);
    }

    #[test]
    fn test_classification_overlapping() {
        let mut c = Classification::default();
        c.insert(PackageRef::sync("xterm", "397-1"), Intent::Upgrade);
        c.insert(PackageRef::sync("xterm", "396-1"), Intent::Remove);
        c.insert(PackageRef::sync("yay", "12-1"), Intent::Install);
        c.insert(PackageRef::aur("yay", "12-1"), Intent::Install);
        c.insert(PackageRef::sync("vim", "9.1-1"), Intent::Install);

        assert_eq!(c.overlapping(), vec!["xterm", "yay"]);
    }

    #[test]
    fn test_classification_serde_roundtrip() {
        let mut c = Classification::default();
        c.insert(PackageRef::sync("xterm", "397-1").with_repo("extra"), Intent::Install);
        c.insert(PackageRef::aur("yay", "12-1"), Intent::Upgrade);
        c.expanded_groups
            .insert("xorg".to_string(), vec!["xterm".to_string()]);

        let json = serde_json::to_string(&c).unwrap();
        let back: Classification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
