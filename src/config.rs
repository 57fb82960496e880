// src/config.rs

//! Engine configuration
//!
//! Loaded from a TOML file; every field has a default so an empty or missing
//! file yields a working configuration.
//!
//! ```toml
//! [options]
//! root = "/"
//! db_path = "/var/lib/pacman"
//! lock_file = "/var/lib/potluck/potluck.lock"
//! repos = ["core", "extra", "multilib"]
//! ignore_pkgs = []
//! hold_pkgs = ["pacman", "glibc"]
//!
//! [aur]
//! enabled = true
//! url = "https://aur.archlinux.org"
//! rpc_path = "/rpc.php"
//! timeout_secs = 30
//!
//! [build]
//! dir = "/var/cache/potluck/build"
//! user = "builder"
//! package_ext = ".pkg.tar.zst"
//! makepkg = "makepkg"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/potluck.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub options: Options,
    pub aur: AurConfig,
    pub build: BuildConfig,
}

/// General package-manager options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Root filesystem path (usually "/")
    pub root: PathBuf,
    /// pacman database directory; its `db.lck` marks a running pacman
    pub db_path: PathBuf,
    /// Lock file serialising transactions of this engine
    pub lock_file: PathBuf,
    /// Sync repositories, in priority order
    pub repos: Vec<String>,
    /// Packages that need confirmation before being installed or upgraded
    pub ignore_pkgs: Vec<String>,
    /// Packages that need confirmation before being removed
    pub hold_pkgs: Vec<String>,
    /// pacman binary
    pub pacman: String,
    /// Also remove installed dependencies a removal leaves unneeded
    pub remove_unneeded_dependencies: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            db_path: PathBuf::from("/var/lib/pacman"),
            lock_file: PathBuf::from("/var/lib/potluck/potluck.lock"),
            repos: vec!["core".to_string(), "extra".to_string(), "multilib".to_string()],
            ignore_pkgs: Vec::new(),
            hold_pkgs: vec!["pacman".to_string(), "glibc".to_string()],
            pacman: "pacman".to_string(),
            remove_unneeded_dependencies: true,
        }
    }
}

impl Options {
    /// pacman's own lock file
    pub fn pacman_lock(&self) -> PathBuf {
        self.db_path.join("db.lck")
    }
}

/// AUR service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AurConfig {
    pub enabled: bool,
    /// Base URL of the AUR web service
    pub url: String,
    /// RPC endpoint relative to `url`
    pub rpc_path: String,
    /// Snapshot tarball path relative to `url`; `{name}` is replaced
    pub snapshot_path: String,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
    /// External PKGBUILD parser; prints depends on line 1, makedepends on line 2.
    /// When unset, the arrays are read directly from the PKGBUILD.
    pub extractor: Option<PathBuf>,
}

impl Default for AurConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://aur.archlinux.org".to_string(),
            rpc_path: "/rpc.php".to_string(),
            snapshot_path: "/cgit/aur.git/snapshot/{name}.tar.gz".to_string(),
            timeout_secs: 30,
            extractor: None,
        }
    }
}

impl AurConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `<url><rpc_path>`
    pub fn rpc_url(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.rpc_path)
    }

    /// `<url>/packages/<name>/PKGBUILD`
    pub fn pkgbuild_url(&self, name: &str) -> String {
        format!("{}/packages/{}/PKGBUILD", self.url.trim_end_matches('/'), name)
    }

    pub fn snapshot_url(&self, name: &str) -> String {
        format!(
            "{}{}",
            self.url.trim_end_matches('/'),
            self.snapshot_path.replace("{name}", name)
        )
    }
}

/// Settings for building AUR packages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Staging root; each package gets `<dir>/aur/<name>`
    pub dir: PathBuf,
    /// Unprivileged account the build tool runs as when we are root
    pub user: Option<String>,
    /// Suffix identifying the built artifact
    pub package_ext: String,
    /// Build tool binary
    pub makepkg: String,
    /// Pass `-f` to overwrite existing artifacts
    pub force: bool,
    /// Discard build tool output
    pub quiet: bool,
    /// Download the full AUR snapshot instead of the PKGBUILD alone
    pub use_snapshot: bool,
    /// Interval between cancellation checks while the build runs
    pub poll_interval_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/cache/potluck/build"),
            user: None,
            package_ext: ".pkg.tar.zst".to_string(),
            makepkg: "makepkg".to_string(),
            force: true,
            quiet: true,
            use_snapshot: true,
            poll_interval_ms: 250,
        }
    }
}

impl BuildConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize configuration: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.build.package_ext.is_empty() {
            return Err(Error::ConfigError(
                "build.package_ext must not be empty".to_string(),
            ));
        }
        if self.aur.enabled && self.aur.url.is_empty() {
            return Err(Error::ConfigError("aur.url must be set".to_string()));
        }
        if let Some(user) = &self.build.user
            && user == "root"
        {
            return Err(Error::ConfigError(
                "build.user must not be root".to_string(),
            ));
        }
        Ok(())
    }
}
