//! Per-environment mutual exclusion.
//!
//! At most one guard exists per environment id at a time. Waiting for one
//! id never blocks callers of another id, and waits are bounded so a stuck
//! request surfaces as `ConcurrencyConflict` instead of queueing forever.

use crate::error::{PkgError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Held {
    ids: Mutex<HashSet<String>>,
    released: Condvar,
}

#[derive(Clone, Default)]
pub struct EnvLocks {
    inner: Arc<Held>,
}

impl EnvLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.ids.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Acquire the lock for `id`, waiting at most `timeout`.
    pub fn acquire(&self, id: &str, timeout: Duration) -> Result<EnvGuard> {
        let held = self.held();
        let (mut held, wait) = self
            .inner
            .released
            .wait_timeout_while(held, timeout, |ids| ids.contains(id))
            .unwrap_or_else(|p| p.into_inner());
        if wait.timed_out() && held.contains(id) {
            tracing::warn!(env = %id, ?timeout, "environment lock wait timed out");
            return Err(PkgError::ConcurrencyConflict(id.to_string()));
        }
        held.insert(id.to_string());
        tracing::debug!(env = %id, "environment lock acquired");
        Ok(EnvGuard {
            locks: self.clone(),
            id: id.to_string(),
        })
    }

    /// Acquire without waiting.
    pub fn try_acquire(&self, id: &str) -> Result<EnvGuard> {
        self.acquire(id, Duration::ZERO)
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.held().contains(id)
    }
}

/// Releases its environment lock on drop, on every exit path.
pub struct EnvGuard {
    locks: EnvLocks,
    id: String,
}

impl EnvGuard {
    pub fn env(&self) -> &str {
        &self.id
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        self.locks.held().remove(&self.id);
        self.locks.inner.released.notify_all();
        tracing::debug!(env = %self.id, "environment lock released");
    }
}
