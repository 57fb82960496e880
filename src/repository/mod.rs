// src/repository/mod.rs

//! Registry of sync repositories known to the session
//!
//! Seeded from `options.repos`; the position in that list is the priority.
//! Database refreshes report their outcome per registered repository.

use crate::error::{Error, Result};
use tracing::info;

/// A sync repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub enabled: bool,
    /// Lower is preferred
    pub priority: usize,
}

/// Ordered set of repositories
#[derive(Debug, Clone, Default)]
pub struct RepositoryRegistry {
    repos: Vec<Repository>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `names` enabled, in priority order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let repos = names
            .into_iter()
            .enumerate()
            .map(|(priority, name)| Repository {
                name: name.into(),
                enabled: true,
                priority,
            })
            .collect();
        Self { repos }
    }

    /// Register a repository with the lowest priority
    pub fn add(&mut self, name: impl Into<String>) -> Result<&Repository> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(Error::ConfigError(format!(
                "Repository '{name}' already exists"
            )));
        }

        let priority = self.repos.iter().map(|r| r.priority + 1).max().unwrap_or(0);
        info!("Added repository: {}", name);
        self.repos.push(Repository {
            name,
            enabled: true,
            priority,
        });
        self.repos
            .last()
            .ok_or_else(|| Error::InvalidState("repository list is empty".to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Result<Repository> {
        let index = self
            .repos
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::not_found(name))?;
        info!("Removed repository: {}", name);
        Ok(self.repos.remove(index))
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let repo = self
            .repos
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::not_found(name))?;
        repo.enabled = enabled;

        info!(
            "Repository '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Enabled repositories, highest priority first
    pub fn enabled(&self) -> Vec<&Repository> {
        let mut repos: Vec<&Repository> = self.repos.iter().filter(|r| r.enabled).collect();
        repos.sort_by_key(|r| r.priority);
        repos
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|r| r.enabled)
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}
