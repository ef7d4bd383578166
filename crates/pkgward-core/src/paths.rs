use crate::error::{PkgError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PKGWARD_DIR: &str = ".pkgward";
pub const ENVS_DIR: &str = ".pkgward/envs";

pub const CONFIG_FILE: &str = ".pkgward/config.yaml";
pub const AUDIT_FILE: &str = ".pkgward/audit.jsonl";

pub const ENV_RECORD: &str = "environment.yaml";
pub const SITE_DIR: &str = "site";
pub const SITE_MANIFEST: &str = "packages.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn pkgward_dir(root: &Path) -> PathBuf {
    root.join(PKGWARD_DIR)
}

pub fn envs_dir(root: &Path) -> PathBuf {
    root.join(ENVS_DIR)
}

pub fn env_dir(root: &Path, id: &str) -> PathBuf {
    envs_dir(root).join(id)
}

pub fn env_record(root: &Path, id: &str) -> PathBuf {
    env_dir(root, id).join(ENV_RECORD)
}

/// Isolated install target inside an environment directory.
pub fn site_dir(env_path: &Path) -> PathBuf {
    env_path.join(SITE_DIR)
}

pub fn site_manifest(env_path: &Path) -> PathBuf {
    site_dir(env_path).join(SITE_MANIFEST)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn audit_path(root: &Path) -> PathBuf {
    root.join(AUDIT_FILE)
}

// ---------------------------------------------------------------------------
// Name and version validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();
static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)*([A-Za-z0-9.+!\-]*)$").unwrap())
}

/// Validate an environment id or package name. Both end up as path
/// components or command arguments, so the alphabet is deliberately small.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(PkgError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn validate_version(version: &str) -> Result<()> {
    if version.len() > 64 || !version_re().is_match(version) {
        return Err(PkgError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
