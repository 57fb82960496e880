// src/backend/pacman.rs

//! pacman command-line backend
//!
//! Queries parse the human-readable output of `pacman -Q`/`-S`. Mutations
//! run non-interactively (`--noconfirm`); pacman's own defaults answer its
//! questions, except for package conflicts: when pacman declines to remove
//! a conflicting package, the conflict is put to the event sink and, if every
//! conflict is accepted, the command is issued once more with the conflict
//! answer inverted.

use super::{Backend, DatabaseSync, SyncStatus};
use crate::config::Options;
use crate::error::{Error, FileConflict, MissingDependency, Result};
use crate::events::Events;
use crate::packages::{InstallReason, PackageRecord, PackageRef, Source};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// `--ask` bit inverting pacman's answer to "remove conflicting package?"
const ASK_CONFLICT_PKG: u32 = 4;

static FILE_CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+): (\S+) exists in (?:filesystem(?: \(owned by (\S+)\))?|both '(\S+)' and '(\S+)')")
        .unwrap_or_else(|e| panic!("invalid file conflict pattern: {e}"))
});

static UNSATISFIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:unable to satisfy dependency|removing \S+ breaks dependency) '([^']+)' required by (\S+)")
        .unwrap_or_else(|e| panic!("invalid dependency pattern: {e}"))
});

static CONFLICT_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":: (\S+) and (\S+) are in conflict")
        .unwrap_or_else(|e| panic!("invalid conflict pattern: {e}"))
});

/// Backend driving the `pacman` binary
#[derive(Debug, Clone)]
pub struct PacmanBackend {
    pacman: String,
    root: String,
    db_path: String,
}

impl PacmanBackend {
    pub fn new(options: &Options) -> Self {
        Self {
            pacman: options.pacman.clone(),
            root: options.root.to_string_lossy().into_owned(),
            db_path: options.db_path.to_string_lossy().into_owned(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.pacman);
        if self.root != "/" {
            cmd.args(["--root", &self.root]);
        }
        cmd.args(["--dbpath", &self.db_path]);
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!("Running {} {}", self.pacman, args.join(" "));
        self.command().args(args).output().map_err(|e| {
            Error::BackendError {
                command: format!("{} {}", self.pacman, args.join(" ")),
                status: None,
                stderr: format!("Failed to run pacman: {}. Is pacman installed?", e),
            }
        })
    }

    /// Run a query; a non-zero exit yields an empty result
    fn query_lines(&self, args: &[&str]) -> Result<Vec<String>> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Run a mutating command, routing conflict questions to the sink
    fn mutate(&self, args: &[String], events: &dyn Events) -> Result<()> {
        let mut argv: Vec<&str> = args.iter().map(String::as_str).collect();
        argv.push("--noconfirm");

        let output = self.run(&argv)?;
        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let conflicts = conflict_prompts(&stdout);
        if conflicts.is_empty() {
            return Err(classify_failure(&argv, &output));
        }

        for (pkg, conflicting) in &conflicts {
            if !events.ask_remove_conflicting_package(pkg, conflicting) {
                return Err(Error::ConflictingDependenciesError(format!(
                    "{} and {} are in conflict",
                    pkg, conflicting
                )));
            }
        }

        info!("Removing {} conflicting package(s) as accepted", conflicts.len());
        let ask = ASK_CONFLICT_PKG.to_string();
        argv.extend(["--ask", ask.as_str()]);
        let output = self.run(&argv)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_failure(&argv, &output))
        }
    }
}

impl Backend for PacmanBackend {
    fn query_installed(&self) -> Result<BTreeSet<String>> {
        let installed: BTreeSet<String> = self.query_lines(&["-Qq"])?.into_iter().collect();
        debug!("Found {} installed packages", installed.len());
        Ok(installed)
    }

    fn query_info(&self, name: &str) -> Result<PackageRecord> {
        let output = self.run(&["-Qi", name])?;
        if !output.status.success() {
            return Err(Error::not_found(name));
        }

        let mut record = parse_info(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::ParseError(format!("Empty pacman -Qi output for {}", name)))?;
        record.installed = true;
        record.files = self
            .query_lines(&["-Qlq", name])?
            .into_iter()
            .filter(|path| !path.ends_with('/'))
            .collect();
        Ok(record)
    }

    fn sync_info(&self, name: &str) -> Result<PackageRecord> {
        let output = self.run(&["-Si", name])?;
        if !output.status.success() {
            return Err(Error::not_found(name));
        }

        parse_info(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::ParseError(format!("Empty pacman -Si output for {}", name)))
    }

    fn search_sync(&self, term: &str) -> Result<Vec<PackageRecord>> {
        let output = self.run(&["-Ss", term])?;
        // pacman exits 1 when nothing matches
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_search(&String::from_utf8_lossy(&output.stdout)))
    }

    fn group_members(&self, group: &str) -> Result<Vec<String>> {
        self.query_lines(&["-Sgq", group])
    }

    fn local_group_members(&self, group: &str) -> Result<Vec<String>> {
        self.query_lines(&["-Qgq", group])
    }

    fn query_upgradable(&self) -> Result<Vec<PackageRef>> {
        Ok(self
            .query_lines(&["-Qu"])?
            .iter()
            .filter_map(|line| parse_upgrade_line(line))
            .collect())
    }

    fn query_foreign(&self) -> Result<Vec<PackageRef>> {
        Ok(self
            .query_lines(&["-Qm"])?
            .iter()
            .filter_map(|line| {
                let (name, version) = line.split_once(' ')?;
                Some(PackageRef::aur(name, version.trim()))
            })
            .collect())
    }

    fn query_unneeded(&self) -> Result<Vec<PackageRef>> {
        // pacman exits 1 when there are no orphans
        Ok(self
            .query_lines(&["-Qdt"])?
            .iter()
            .filter_map(|line| {
                let (name, version) = line.split_once(' ')?;
                Some(PackageRef::sync(name, version.trim()))
            })
            .collect())
    }

    fn query_owner(&self, path: &Path) -> Result<Option<PackageRef>> {
        let path = path.to_string_lossy();
        Ok(self
            .query_lines(&["-Qo", &*path])?
            .iter()
            .find_map(|line| parse_owner_line(line)))
    }

    fn sync_databases(&self) -> Result<Vec<DatabaseSync>> {
        let args = ["-Sy", "--noconfirm"];
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(classify_failure(&args, &output));
        }
        Ok(parse_sync_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn install(&self, names: &[String], events: &dyn Events) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-S".to_string()];
        args.extend(names.iter().cloned());
        self.mutate(&args, events)
    }

    fn install_from_file(&self, path: &Path, events: &dyn Events) -> Result<()> {
        let args = vec!["-U".to_string(), path.to_string_lossy().into_owned()];
        self.mutate(&args, events)
    }

    fn remove(&self, names: &[String], events: &dyn Events) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-R".to_string()];
        args.extend(names.iter().cloned());
        self.mutate(&args, events)
    }

    fn mark_as_dependencies(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-D", "--asdeps"];
        args.extend(names.iter().map(String::as_str));
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(classify_failure(&args, &output));
        }
        Ok(())
    }
}

/// Parse the first package block of `pacman -Qi` / `-Si` output
fn parse_info(output: &str) -> Option<PackageRecord> {
    let mut record = PackageRecord::default();
    let mut seen_name = false;

    for line in output.lines() {
        if line.trim().is_empty() {
            if seen_name {
                break;
            }
            continue;
        }
        // Continuation lines (Optional Deps) are indented
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let list = || -> Vec<String> {
            if value == "None" {
                Vec::new()
            } else {
                value.split_whitespace().map(str::to_string).collect()
            }
        };

        match key.trim() {
            "Repository" => record.repo = Some(value.to_string()),
            "Name" => {
                record.name = value.to_string();
                seen_name = true;
            }
            "Version" => record.version = value.to_string(),
            "Description" => record.description = Some(value.to_string()),
            "Groups" => record.groups = list(),
            "Depends On" => record.depends = list(),
            "Required By" => record.required_by = list(),
            "Installed Size" | "Download Size" if record.size.is_none() => {
                record.size = parse_size(value);
            }
            "Install Reason" => {
                record.install_reason = Some(if value.starts_with("Explicitly") {
                    InstallReason::Explicit
                } else {
                    InstallReason::Dependency
                });
            }
            _ => {}
        }
    }

    if !seen_name {
        return None;
    }
    record.source = Some(Source::Sync);
    Some(record)
}

/// Parse a `pacman -Qo` line: `/usr/bin/ls is owned by coreutils 9.5-1`
fn parse_owner_line(line: &str) -> Option<PackageRef> {
    let (_, owner) = line.split_once(" is owned by ")?;
    let (name, version) = owner.trim().split_once(' ')?;
    Some(PackageRef::sync(name, version))
}

/// Parse pacman size string (e.g., "1.5 MiB") to bytes
fn parse_size(s: &str) -> Option<u64> {
    let (num, unit) = s.split_once(' ')?;
    let num: f64 = num.replace(',', ".").parse().ok()?;
    let multiplier = match unit.trim() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((num * multiplier) as u64)
}

/// Parse `pacman -Ss` output
///
/// ```text
/// extra/xterm 397-1 [installed]
///     X Terminal Emulator
/// ```
fn parse_search(output: &str) -> Vec<PackageRecord> {
    let mut results: Vec<PackageRecord> = Vec::new();

    for line in output.lines() {
        if line.starts_with(char::is_whitespace) {
            if let Some(last) = results.last_mut() {
                last.description = Some(line.trim().to_string());
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(qualified), Some(version)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some((repo, name)) = qualified.split_once('/') else {
            continue;
        };

        let rest: Vec<&str> = parts.collect();
        let mut record = PackageRecord::new(name, version, Source::Sync).with_repo(repo);
        record.installed = rest.iter().any(|p| p.starts_with("[installed"));
        record.groups = rest
            .iter()
            .skip_while(|p| !p.starts_with('('))
            .take_while(|p| !p.starts_with('['))
            .map(|p| p.trim_matches(|c| c == '(' || c == ')').to_string())
            .filter(|g| !g.is_empty())
            .collect();
        results.push(record);
    }

    results
}

/// Parse one `pacman -Qu` line: `name old -> new [ignored]`
fn parse_upgrade_line(line: &str) -> Option<PackageRef> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [name, _old, "->", new, ..] => Some(PackageRef::sync(*name, *new)),
        _ => None,
    }
}

/// Parse `pacman -Sy` output into per-repository outcomes
fn parse_sync_output(output: &str) -> Vec<DatabaseSync> {
    let mut results = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("::") || line.is_empty() {
            continue;
        }
        let Some(repo) = line.split_whitespace().next() else {
            continue;
        };
        let status = if line.ends_with("is up to date") {
            SyncStatus::UpToDate
        } else if line.contains("downloading") {
            SyncStatus::Updated
        } else if line.starts_with("error:") {
            warn!("{}", line);
            continue;
        } else {
            continue;
        };
        results.push(DatabaseSync {
            repo: repo.to_string(),
            status,
        });
    }
    results
}

/// Conflict questions pacman declined under `--noconfirm`
fn conflict_prompts(stdout: &str) -> Vec<(String, String)> {
    CONFLICT_PROMPT
        .captures_iter(stdout)
        .map(|c| (strip_version(&c[1]), strip_version(&c[2])))
        .collect()
}

/// `name-pkgver-pkgrel` -> `name`
fn strip_version(token: &str) -> String {
    let parts: Vec<&str> = token.rsplitn(3, '-').collect();
    match parts.as_slice() {
        [_rel, _ver, name] => name.to_string(),
        _ => token.to_string(),
    }
}

/// Map a failed pacman invocation onto the error taxonomy
fn classify_failure(args: &[&str], output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = format!("{}\n{}", stderr, stdout);

    let file_conflicts: Vec<FileConflict> = text
        .lines()
        .filter_map(|line| FILE_CONFLICT.captures(line.trim()))
        .map(|c| FileConflict {
            target: c[1].to_string(),
            file: c[2].to_string(),
            owner: c
                .get(3)
                .or_else(|| c.get(5))
                .map(|m| m.as_str().to_string()),
        })
        .collect();
    if !file_conflicts.is_empty() || text.contains("conflicting files") {
        return Error::FileConflictError(file_conflicts);
    }

    let missing: Vec<MissingDependency> = UNSATISFIED
        .captures_iter(&text)
        .map(|c| MissingDependency {
            target: c[2].to_string(),
            dependency: c[1].to_string(),
        })
        .collect();
    if !missing.is_empty() || text.contains("could not satisfy dependencies") {
        return Error::UnsatisfiedDependenciesError(missing);
    }

    if text.contains("are in conflict") || text.contains("unresolvable package conflicts") {
        return Error::ConflictingDependenciesError(stderr.trim().to_string());
    }
    if text.contains("unable to lock database") {
        return Error::LockedError(stderr.trim().to_string());
    }
    if text.contains("you cannot perform this operation unless you are root") {
        return Error::PermissionError(stderr.trim().to_string());
    }
    if text.contains("target not found") {
        let names = text
            .lines()
            .filter_map(|l| l.trim().strip_prefix("error: target not found: "))
            .map(str::to_string)
            .collect();
        return Error::NotFoundError(names);
    }

    Error::BackendError {
        command: format!("pacman {}", args.join(" ")),
        status: output.status.code(),
        stderr: stderr.trim().to_string(),
    }
}
