use crate::error::{PkgError, Result};
use crate::metadata::canonical_name;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// An isolated install target and the packages recorded in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub path: PathBuf,
    pub interpreter: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Package name → installed version.
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
}

impl Environment {
    pub fn installed_version(&self, package: &str) -> Option<&str> {
        let wanted = canonical_name(package);
        self.packages
            .iter()
            .find(|(name, _)| canonical_name(name) == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Path of a venv executable (`python`, `pip`) inside the site directory.
    /// The file only exists once a real virtualenv has been provisioned.
    pub fn executable(&self, name: &str) -> PathBuf {
        let site = paths::site_dir(&self.path);
        if cfg!(windows) {
            site.join("Scripts").join(format!("{name}.exe"))
        } else {
            site.join("bin").join(name)
        }
    }

    /// Bytes used on disk by the environment directory. Symlinks are counted
    /// as links, not followed.
    pub fn disk_usage(&self) -> Result<u64> {
        fn walk(dir: &Path) -> std::io::Result<u64> {
            let mut total = 0;
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let meta = entry.path().symlink_metadata()?;
                total += if meta.is_dir() {
                    walk(&entry.path())?
                } else {
                    meta.len()
                };
            }
            Ok(total)
        }
        Ok(walk(&self.path)?)
    }
}

// ---------------------------------------------------------------------------
// EnvironmentStore
// ---------------------------------------------------------------------------

/// Sole owner of environment records on disk.
///
/// Every mutation goes through the store and is serialized by an internal
/// mutex; records are written atomically, so readers never observe a
/// half-written file.
pub struct EnvironmentStore {
    root: PathBuf,
    write: Mutex<()>,
}

impl EnvironmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another writer panicked mid-call; the
        // on-disk record is still whole because writes are atomic.
        self.write.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn exists(&self, id: &str) -> bool {
        paths::env_record(&self.root, id).exists()
    }

    pub fn create(&self, id: &str, interpreter: &str) -> Result<Environment> {
        paths::validate_name(id)?;
        let _g = self.guard();

        let dir = paths::env_dir(&self.root, id);
        crate::io::ensure_dir(&paths::envs_dir(&self.root))?;
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.exists(id) {
                    return Err(PkgError::EnvironmentExists(id.to_string()));
                }
                tracing::warn!(env = %id, "reusing environment directory without a record");
            }
            Err(e) => return Err(e.into()),
        }

        let now = Utc::now();
        let env = Environment {
            id: id.to_string(),
            path: dir,
            interpreter: interpreter.to_string(),
            created_at: now,
            updated_at: now,
            packages: BTreeMap::new(),
        };
        self.save(&env)?;
        tracing::info!(env = %id, interpreter, "environment created");
        Ok(env)
    }

    pub fn get(&self, id: &str) -> Result<Environment> {
        let record = paths::env_record(&self.root, id);
        if paths::validate_name(id).is_err() || !record.exists() {
            return Err(PkgError::EnvironmentNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&record)?;
        let mut env: Environment = serde_yaml::from_str(&data)?;
        // The record may have been written under a different project path.
        env.path = paths::env_dir(&self.root, id);
        Ok(env)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let _g = self.guard();
        if paths::validate_name(id).is_err() || !self.exists(id) {
            return Err(PkgError::EnvironmentNotFound(id.to_string()));
        }
        std::fs::remove_dir_all(paths::env_dir(&self.root, id))?;
        tracing::info!(env = %id, "environment removed");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Environment>> {
        let dir = paths::envs_dir(&self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut envs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let id = entry.file_name().to_string_lossy().into_owned();
                match self.get(&id) {
                    Ok(env) => envs.push(env),
                    Err(PkgError::EnvironmentNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        envs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(envs)
    }

    /// Replace the recorded package set. This is the only way installed
    /// packages change in the store.
    pub fn replace_packages(
        &self,
        id: &str,
        packages: BTreeMap<String, String>,
    ) -> Result<Environment> {
        let _g = self.guard();
        let mut env = self.get(id)?;
        env.packages = packages;
        env.updated_at = Utc::now();
        self.save(&env)?;
        Ok(env)
    }

    fn save(&self, env: &Environment) -> Result<()> {
        let data = serde_yaml::to_string(env)?;
        crate::io::atomic_write(&paths::env_record(&self.root, &env.id), data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
