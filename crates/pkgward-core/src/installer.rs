use crate::backend::{Backend, PackageSet};
use crate::environment::{Environment, EnvironmentStore};
use crate::error::{PkgError, Result};
use crate::lock::EnvLocks;
use crate::metadata::{canonical_name, PackageMetadata};
use crate::types::InstallRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// InstallOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed {
        version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
    },
    AlreadyInstalled {
        version: String,
    },
    Failed {
        error: String,
        rolled_back: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        rollback_error: Option<String>,
    },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, InstallOutcome::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Installer
// ---------------------------------------------------------------------------

/// Mutates environments on behalf of approved requests.
///
/// Every mutation of an environment happens under that environment's lock;
/// package sets only reach the store after the backend reports the
/// requested version present.
pub struct Installer {
    store: Arc<EnvironmentStore>,
    backend: Arc<dyn Backend>,
    locks: EnvLocks,
    lock_timeout: Duration,
    default_interpreter: String,
}

impl Installer {
    pub fn new(
        store: Arc<EnvironmentStore>,
        backend: Arc<dyn Backend>,
        locks: EnvLocks,
        lock_timeout: Duration,
        default_interpreter: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            locks,
            lock_timeout,
            default_interpreter: default_interpreter.into(),
        }
    }

    pub fn store(&self) -> &EnvironmentStore {
        &self.store
    }

    /// Create and provision an environment. A failed provision removes the
    /// half-created record again.
    pub fn create_env(&self, id: &str, interpreter: Option<&str>) -> Result<Environment> {
        crate::paths::validate_name(id)?;
        let _guard = self.locks.acquire(id, self.lock_timeout)?;
        let interpreter = interpreter.unwrap_or(&self.default_interpreter);
        let env = self.store.create(id, interpreter)?;
        if let Err(e) = self.backend.provision(&env) {
            tracing::error!(env = %id, error = %e, "provisioning failed, discarding environment");
            if let Err(cleanup) = self.store.remove(id) {
                tracing::warn!(env = %id, error = %cleanup, "cleanup after failed provision");
            }
            return Err(e);
        }
        let packages = self.backend.list(&env)?;
        self.store.replace_packages(id, packages)
    }

    pub fn remove_env(&self, id: &str) -> Result<()> {
        let _guard = self.locks.acquire(id, self.lock_timeout)?;
        self.store.remove(id)
    }

    /// Install the resolved release described by `metadata`.
    ///
    /// Errors are returned for problems found before anything was touched
    /// (missing environment, lock conflict). Once mutation starts, failures
    /// come back as `InstallOutcome::Failed` after the environment has been
    /// restored to its snapshot.
    pub fn install(
        &self,
        request: &InstallRequest,
        metadata: &PackageMetadata,
    ) -> Result<InstallOutcome> {
        let id = request.env.as_str();
        if !self.store.exists(id) {
            if !request.create_env {
                return Err(PkgError::EnvironmentNotFound(id.to_string()));
            }
            match self.create_env(id, None) {
                Ok(_) | Err(PkgError::EnvironmentExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let _guard = self.locks.acquire(id, self.lock_timeout)?;
        let env = self.store.get(id)?;
        let name = metadata.name.as_str();
        let version = metadata.version.as_str();

        let previous = env.installed_version(name).map(String::from);
        if !request.force && previous.as_deref() == Some(version) {
            tracing::info!(env = %id, package = %name, version, "already installed");
            return Ok(InstallOutcome::AlreadyInstalled {
                version: version.to_string(),
            });
        }

        let backend_snapshot = self.backend.list(&env)?;
        let store_snapshot = env.packages.clone();

        tracing::info!(env = %id, package = %name, version, "installing");
        match self.apply(&env, name, version) {
            Ok(_) => Ok(InstallOutcome::Installed {
                version: version.to_string(),
                previous,
            }),
            Err(e) => {
                tracing::error!(env = %id, package = %name, error = %e, "install failed, rolling back");
                Ok(self.rollback(&env, &backend_snapshot, &store_snapshot, e))
            }
        }
    }

    fn apply(&self, env: &Environment, name: &str, version: &str) -> Result<Environment> {
        self.backend.install(env, name, version)?;
        let listed = self.backend.list(env)?;
        verify_present(&listed, name, version)?;
        self.store.replace_packages(&env.id, listed)
    }

    fn rollback(
        &self,
        env: &Environment,
        backend_snapshot: &PackageSet,
        store_snapshot: &PackageSet,
        cause: PkgError,
    ) -> InstallOutcome {
        let restored = self
            .backend
            .restore(env, backend_snapshot)
            .and_then(|_| {
                let current = self.store.get(&env.id)?;
                if &current.packages != store_snapshot {
                    self.store.replace_packages(&env.id, store_snapshot.clone())?;
                }
                Ok(())
            });
        let (rolled_back, rollback_error) = match restored {
            Ok(()) => {
                tracing::info!(env = %env.id, "rollback complete");
                (true, None)
            }
            Err(e) => {
                tracing::error!(env = %env.id, error = %e, "rollback failed");
                (false, Some(e.to_string()))
            }
        };
        InstallOutcome::Failed {
            error: cause.to_string(),
            rolled_back,
            rollback_error,
        }
    }

    pub fn uninstall(&self, id: &str, name: &str) -> Result<Environment> {
        let _guard = self.locks.acquire(id, self.lock_timeout)?;
        let env = self.store.get(id)?;
        if env.installed_version(name).is_none() {
            return Err(PkgError::PackageNotFound(format!("{name} in {id}")));
        }
        self.backend.uninstall(&env, name)?;
        let listed = self.backend.list(&env)?;
        self.store.replace_packages(id, listed)
    }
}

fn verify_present(listed: &PackageSet, name: &str, version: &str) -> Result<()> {
    let wanted = canonical_name(name);
    match listed.iter().find(|(n, _)| canonical_name(n) == wanted) {
        Some((_, v)) if v == version => Ok(()),
        Some((_, v)) => Err(PkgError::InstallFailed(format!(
            "verification mismatch: expected {name} {version}, found {v}"
        ))),
        None => Err(PkgError::InstallFailed(format!(
            "verification failed: {name} not present after install"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
