// src/aur/mod.rs

//! Arch User Repository collaborator
//!
//! Talks to the AUR RPC interface over HTTP and retrieves build recipes.
//! Requests use the configured timeout and are never retried; a failed
//! request surfaces as [`Error::DownloadError`].
//!
//! The RPC envelope is loose: `results` may be a list, a single object, or
//! a plain string carrying an error message. A string is treated as "no
//! results", never as a failure of the caller's operation.

mod pkgbuild;

pub use pkgbuild::{BuildDependencies, DependencyExtractor, InlineExtractor, ScriptExtractor};

use crate::config::AurConfig;
use crate::error::{Error, Result};
use crate::packages::{PackageRecord, Source};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Remote AUR operations
pub trait AurService: Send + Sync {
    /// Search package names and descriptions
    fn search(&self, term: &str) -> Result<Vec<PackageRecord>>;

    /// Metadata for one package (`NotFoundError` when unknown)
    fn info(&self, name: &str) -> Result<PackageRecord>;

    /// Contents of the package's PKGBUILD
    fn fetch_pkgbuild(&self, name: &str) -> Result<String>;

    /// gzip-compressed tarball of the package's build files
    fn fetch_snapshot(&self, name: &str) -> Result<Vec<u8>>;
}

/// One package as returned by the RPC interface
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AurPackage {
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    make_depends: Vec<String>,
    /// Timestamp of the out-of-date flag, null when not flagged
    #[serde(default)]
    out_of_date: Option<i64>,
    #[serde(default)]
    num_votes: Option<u64>,
}

impl From<AurPackage> for PackageRecord {
    fn from(pkg: AurPackage) -> Self {
        let mut record = PackageRecord::new(pkg.name, pkg.version, Source::Aur)
            .with_repo("aur")
            .with_depends(pkg.depends)
            .with_build_depends(pkg.make_depends);
        record.description = pkg.description;
        record.out_of_date = pkg.out_of_date.is_some();
        record.votes = pkg.num_votes;
        record
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum RpcResults {
    List(Vec<AurPackage>),
    One(AurPackage),
    Message(String),
    #[default]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    results: RpcResults,
    #[serde(default)]
    error: Option<String>,
}

/// Decode an RPC response body into package records
fn parse_envelope(body: &str) -> Result<Vec<PackageRecord>> {
    let envelope: RpcEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::ParseError(format!("Invalid AUR response: {e}")))?;

    if let Some(error) = &envelope.error {
        warn!("AUR reported an error: {}", error);
    }

    let packages = match envelope.results {
        RpcResults::List(list) => list,
        RpcResults::One(pkg) => vec![pkg],
        RpcResults::Message(message) => {
            debug!("AUR returned a message instead of results: {}", message);
            Vec::new()
        }
        RpcResults::Empty => Vec::new(),
    };

    Ok(packages.into_iter().map(PackageRecord::from).collect())
}

/// Blocking HTTP client for the AUR
pub struct AurClient {
    client: Client,
    config: AurConfig,
}

impl AurClient {
    pub fn new(config: &AurConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        debug!("GET {}", url);
        self.client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Request to {url} failed: {e}")))
    }

    fn rpc(&self, kind: &str, arg: &str) -> Result<Vec<PackageRecord>> {
        let url = format!(
            "{}?type={}&arg={}",
            self.config.rpc_url(),
            kind,
            urlencoding::encode(arg)
        );
        let response = self.get(&url)?;
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "AUR RPC returned HTTP {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read AUR response: {e}")))?;
        parse_envelope(&body)
    }

    /// Fetch a file, mapping HTTP 404 onto `NotFoundError(name)`
    fn fetch(&self, url: &str, name: &str) -> Result<reqwest::blocking::Response> {
        let response = self.get(url)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::not_found(name)),
            status if !status.is_success() => Err(Error::DownloadError(format!(
                "{url} returned HTTP {status}"
            ))),
            _ => Ok(response),
        }
    }
}

impl AurService for AurClient {
    fn search(&self, term: &str) -> Result<Vec<PackageRecord>> {
        let results = self.rpc("search", term)?;
        debug!("AUR search for '{}' returned {} results", term, results.len());
        Ok(results)
    }

    fn info(&self, name: &str) -> Result<PackageRecord> {
        self.rpc("info", name)?
            .into_iter()
            .find(|record| record.name == name)
            .ok_or_else(|| Error::not_found(name))
    }

    fn fetch_pkgbuild(&self, name: &str) -> Result<String> {
        let url = self.config.pkgbuild_url(name);
        info!("Fetching PKGBUILD for {}", name);
        self.fetch(&url, name)?
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read PKGBUILD of {name}: {e}")))
    }

    fn fetch_snapshot(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.config.snapshot_url(name);
        info!("Downloading snapshot of {}", name);
        let bytes = self
            .fetch(&url, name)?
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read snapshot of {name}: {e}")))?;
        Ok(bytes.to_vec())
    }
}
