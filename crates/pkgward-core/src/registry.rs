use crate::error::{PkgError, Result};
use crate::metadata::{compare_versions, DistributionFile, PackageMetadata};
use crate::types::VersionSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Registry trait
// ---------------------------------------------------------------------------

/// Lookup of package metadata by name and version.
///
/// Implementations report a missing package as `PackageNotFound` and any
/// transport or availability problem as `RegistryUnavailable`; only the
/// latter is retried.
pub trait Registry: Send + Sync {
    fn fetch(&self, name: &str, version: &VersionSpec) -> Result<PackageMetadata>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Treated as at least 1.
    pub attempts: u32,
    /// Delay before the second attempt; doubled after every failure.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }
}

/// Fetch with bounded retries on `RegistryUnavailable`.
///
/// Any other error (notably `PackageNotFound`) is returned immediately.
/// When attempts run out the last unavailability error is returned.
pub fn fetch_with_retry(
    registry: &dyn Registry,
    name: &str,
    version: &VersionSpec,
    policy: RetryPolicy,
) -> Result<PackageMetadata> {
    let attempts = policy.attempts.max(1);
    let mut delay = policy.backoff;
    let mut attempt = 1;
    loop {
        match registry.fetch(name, version) {
            Ok(meta) => {
                tracing::debug!(package = %name, attempt, "metadata fetched");
                return Ok(meta);
            }
            Err(PkgError::RegistryUnavailable(msg)) if attempt < attempts => {
                tracing::warn!(
                    package = %name,
                    attempt,
                    attempts,
                    error = %msg,
                    "registry unavailable, retrying"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(PkgError::RegistryUnavailable(msg)) => {
                return Err(PkgError::RegistryUnavailable(format!(
                    "{msg} (gave up after {attempts} attempt(s))"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// IndexRegistry
// ---------------------------------------------------------------------------

/// One release as written in an offline index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloads: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub files: Vec<DistributionFile>,
    #[serde(default)]
    pub project_urls: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<IndexEntry>>,
}

/// Registry backed by a YAML index on disk (an offline mirror).
///
/// The file is re-read on every fetch so edits are picked up immediately
/// and no metadata is cached between requests.
pub struct IndexRegistry {
    path: PathBuf,
}

impl IndexRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<IndexFile> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            PkgError::RegistryUnavailable(format!("cannot read index {}: {e}", self.path.display()))
        })?;
        serde_yaml::from_str(&data).map_err(|e| {
            PkgError::RegistryUnavailable(format!("malformed index {}: {e}", self.path.display()))
        })
    }
}

impl Registry for IndexRegistry {
    fn fetch(&self, name: &str, version: &VersionSpec) -> Result<PackageMetadata> {
        let index = self.read()?;
        let wanted = name.to_lowercase();
        let (canonical, entries) = index
            .packages
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .ok_or_else(|| PkgError::PackageNotFound(name.to_string()))?;

        let entry = match version {
            VersionSpec::Latest => entries
                .iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version)),
            VersionSpec::Exact(v) => entries.iter().find(|e| &e.version == v),
        }
        .ok_or_else(|| PkgError::PackageNotFound(format!("{name}=={version}")))?;

        Ok(PackageMetadata {
            name: canonical.clone(),
            version: entry.version.clone(),
            author: entry.author.clone(),
            license: entry.license.clone(),
            summary: entry.summary.clone(),
            published_at: entry.published_at,
            fetched_at: Utc::now(),
            downloads: entry.downloads,
            dependencies: entry.dependencies.clone(),
            files: entry.files.clone(),
            project_urls: entry.project_urls.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
