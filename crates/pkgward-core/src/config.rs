use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PolicyConfig
// ---------------------------------------------------------------------------

/// Static rule tables for the security evaluator. The thresholds are
/// illustrative defaults and meant to be tuned per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Skip the approval prompt for low-risk packages.
    #[serde(default)]
    pub auto_allow_low: bool,
    /// Refuse high-risk packages outright instead of asking the operator.
    #[serde(default)]
    pub reject_high: bool,
    #[serde(default = "default_min_age_days")]
    pub min_age_days: u32,
    #[serde(default = "default_min_downloads")]
    pub min_downloads: u64,
    /// Case-insensitive substrings that mark a package name as suspicious.
    #[serde(default = "default_blocklist")]
    pub blocklist: Vec<String>,
    /// Package name → first version without a known vulnerability.
    #[serde(default = "default_advisories")]
    pub advisories: BTreeMap<String, String>,
    /// Hosts release files may be downloaded from without a finding.
    #[serde(default = "default_trusted_hosts")]
    pub trusted_hosts: Vec<String>,
    /// Release files larger than this many MiB are flagged.
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: u64,
}

fn default_min_age_days() -> u32 {
    7
}

fn default_min_downloads() -> u64 {
    100
}

fn default_blocklist() -> Vec<String> {
    [
        "hack", "crack", "steal", "password", "keylog", "spy", "trojan", "malware", "virus",
        "backdoor", "rootkit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_advisories() -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("requests".to_string(), "2.25.0".to_string());
    m.insert("django".to_string(), "3.2.0".to_string());
    m.insert("flask".to_string(), "2.0.0".to_string());
    m.insert("sqlalchemy".to_string(), "1.4.0".to_string());
    m
}

fn default_trusted_hosts() -> Vec<String> {
    vec!["pypi.org".to_string(), "files.pythonhosted.org".to_string()]
}

fn default_max_file_mb() -> u64 {
    100
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_allow_low: false,
            reject_high: false,
            min_age_days: default_min_age_days(),
            min_downloads: default_min_downloads(),
            blocklist: default_blocklist(),
            advisories: default_advisories(),
            trusted_hosts: default_trusted_hosts(),
            max_file_mb: default_max_file_mb(),
        }
    }
}

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Seconds to wait for an operator answer. `0` waits indefinitely.
    #[serde(default = "default_gate_timeout")]
    pub timeout_seconds: u32,
}

fn default_gate_timeout() -> u32 {
    300
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_gate_timeout(),
        }
    }
}

impl GateConfig {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_seconds as u64))
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrySource {
    Pypi {
        #[serde(default = "default_pypi_url")]
        url: String,
        /// Download statistics endpoint. `None` leaves download counts unknown.
        #[serde(default = "default_stats_url")]
        stats_url: Option<String>,
        #[serde(default = "default_http_timeout")]
        timeout_seconds: u32,
    },
    /// Offline YAML index, path relative to the project root.
    Index { path: PathBuf },
}

fn default_pypi_url() -> String {
    "https://pypi.org".to_string()
}

fn default_stats_url() -> Option<String> {
    Some("https://pypistats.org".to_string())
}

fn default_http_timeout() -> u32 {
    10
}

fn default_registry_source() -> RegistrySource {
    RegistrySource::Pypi {
        url: default_pypi_url(),
        stats_url: default_stats_url(),
        timeout_seconds: default_http_timeout(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_source")]
    pub source: RegistrySource,
    /// Total fetch attempts, including the first.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source: default_registry_source(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// InstallerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Real virtualenvs driven through `python -m venv` and pip.
    Pip,
    /// Package sets recorded in a manifest file only; no interpreter needed.
    Manifest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_env_name")]
    pub default_env: String,
    /// Interpreter used to create new environments.
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u32,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u32,
}

fn default_backend() -> BackendKind {
    BackendKind::Pip
}

fn default_env_name() -> String {
    "default".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_lock_timeout() -> u32 {
    30
}

fn default_command_timeout() -> u32 {
    300
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            default_env: default_env_name(),
            python: default_python(),
            lock_timeout_seconds: default_lock_timeout(),
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

impl InstallerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds as u64)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds as u64)
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    /// Load `.pkgward/config.yaml`, falling back to defaults when the file
    /// does not exist. A file that exists but does not parse is an error.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        if self.policy.blocklist.is_empty() {
            push(
                WarnLevel::Warning,
                "policy.blocklist is empty; suspicious names will not be flagged".to_string(),
            );
        }
        if self.policy.blocklist.iter().any(|p| p.trim().is_empty()) {
            push(
                WarnLevel::Error,
                "policy.blocklist contains an empty pattern (matches every package)".to_string(),
            );
        }
        for (pkg, safe) in &self.policy.advisories {
            if paths::validate_version(safe).is_err() {
                push(
                    WarnLevel::Error,
                    format!("policy.advisories: '{safe}' for '{pkg}' is not a version"),
                );
            }
        }
        if self.policy.trusted_hosts.is_empty() {
            push(
                WarnLevel::Warning,
                "policy.trusted_hosts is empty; every release file host will be flagged"
                    .to_string(),
            );
        }
        if self.policy.min_age_days == 0 && self.policy.min_downloads == 0 {
            push(
                WarnLevel::Warning,
                "policy.min_age_days and policy.min_downloads are both 0; \
                 age and popularity checks are disabled"
                    .to_string(),
            );
        }

        if self.gate.timeout_seconds == 0 {
            push(
                WarnLevel::Warning,
                "gate.timeout_seconds is 0; approval prompts wait indefinitely".to_string(),
            );
        }

        if self.registry.retries == 0 {
            push(
                WarnLevel::Error,
                "registry.retries must be at least 1 (it counts the first attempt)".to_string(),
            );
        } else if self.registry.retries > 10 {
            push(
                WarnLevel::Warning,
                format!(
                    "registry.retries={} (>10 is unusual)",
                    self.registry.retries
                ),
            );
        }
        match &self.registry.source {
            RegistrySource::Pypi { url, .. } if url.trim().is_empty() => {
                push(WarnLevel::Error, "registry.source.url is empty".to_string());
            }
            RegistrySource::Index { path } if path.as_os_str().is_empty() => {
                push(WarnLevel::Error, "registry.source.path is empty".to_string());
            }
            _ => {}
        }

        if paths::validate_name(&self.installer.default_env).is_err() {
            push(
                WarnLevel::Error,
                format!(
                    "installer.default_env '{}' is not a valid environment name",
                    self.installer.default_env
                ),
            );
        }
        if self.installer.backend == BackendKind::Pip && self.installer.python.trim().is_empty() {
            push(WarnLevel::Error, "installer.python is empty".to_string());
        }
        if self.installer.lock_timeout_seconds == 0 {
            push(
                WarnLevel::Warning,
                "installer.lock_timeout_seconds is 0; concurrent installs fail immediately"
                    .to_string(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.version, 1);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let yaml = "policy:\n  auto_allow_low: true\n  min_downloads: 10\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.policy.auto_allow_low);
        assert_eq!(cfg.policy.min_downloads, 10);
        assert_eq!(cfg.policy.min_age_days, 7);
        assert!(cfg.policy.blocklist.contains(&"keylog".to_string()));
        assert!(cfg.policy.trusted_hosts.contains(&"files.pythonhosted.org".to_string()));
        assert_eq!(cfg.policy.max_file_mb, 100);
        assert_eq!(cfg.gate.timeout_seconds, 300);
        assert_eq!(cfg.registry.retries, 3);
        assert_eq!(cfg.installer.backend, BackendKind::Pip);
    }

    #[test]
    fn registry_source_tagged() {
        let yaml = "source:\n  type: index\n  path: index.yaml\nretries: 2\n";
        let reg: RegistryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            reg.source,
            RegistrySource::Index {
                path: PathBuf::from("index.yaml")
            }
        );
        assert_eq!(reg.backoff_ms, 500);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(cfg, Config::new());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new();
        cfg.installer.backend = BackendKind::Manifest;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.installer.backend, BackendKind::Manifest);
    }

    #[test]
    fn default_config_has_no_errors() {
        let warnings = Config::new().validate();
        assert!(warnings.iter().all(|w| w.level != WarnLevel::Error));
    }

    #[test]
    fn validate_flags_zero_retries_and_bad_env() {
        let mut cfg = Config::new();
        cfg.registry.retries = 0;
        cfg.installer.default_env = "bad env".to_string();
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn gate_timeout_zero_means_unbounded() {
        let gate = GateConfig { timeout_seconds: 0 };
        assert!(gate.timeout().is_none());
        assert_eq!(
            GateConfig::default().timeout(),
            Some(Duration::from_secs(300))
        );
    }
}
