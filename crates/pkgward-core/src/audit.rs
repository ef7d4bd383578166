//! Append-only audit trail.
//!
//! One JSON object per line in `.pkgward/audit.jsonl`. Records are only ever
//! appended; there is no API to rewrite or delete them.

use crate::approval::ApprovalDecision;
use crate::error::Result;
use crate::installer::InstallOutcome;
use crate::security::RiskVerdict;
use crate::types::InstallRequest;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Install,
    Verify,
    CreateEnv,
    RemoveEnv,
    Uninstall,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Install => "install",
            AuditAction::Verify => "verify",
            AuditAction::CreateEnv => "create_env",
            AuditAction::RemoveEnv => "remove_env",
            AuditAction::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Installed,
    AlreadyInstalled,
    Verified,
    Uninstalled,
    EnvCreated,
    EnvRemoved,
    Denied,
    PolicyRejected,
    InstallFailed,
    NotFound,
    AlreadyExists,
    RegistryUnavailable,
    Conflict,
    Invalid,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Installed => "installed",
            AuditOutcome::AlreadyInstalled => "already_installed",
            AuditOutcome::Verified => "verified",
            AuditOutcome::Uninstalled => "uninstalled",
            AuditOutcome::EnvCreated => "env_created",
            AuditOutcome::EnvRemoved => "env_removed",
            AuditOutcome::Denied => "denied",
            AuditOutcome::PolicyRejected => "policy_rejected",
            AuditOutcome::InstallFailed => "install_failed",
            AuditOutcome::NotFound => "not_found",
            AuditOutcome::AlreadyExists => "already_exists",
            AuditOutcome::RegistryUnavailable => "registry_unavailable",
            AuditOutcome::Conflict => "conflict",
            AuditOutcome::Invalid => "invalid",
            AuditOutcome::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AuditOutcome::Installed
                | AuditOutcome::AlreadyInstalled
                | AuditOutcome::Verified
                | AuditOutcome::Uninstalled
                | AuditOutcome::EnvCreated
                | AuditOutcome::EnvRemoved
        )
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<InstallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<RiskVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
    /// Installer result, including whether a failed install was rolled back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallOutcome>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            action,
            env: None,
            request: None,
            verdict: None,
            decision: None,
            install: None,
            outcome,
            detail: None,
        }
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn request(mut self, request: &InstallRequest) -> Self {
        self.env = Some(request.env.clone());
        self.request = Some(request.clone());
        self
    }

    pub fn verdict(mut self, verdict: Option<&RiskVerdict>) -> Self {
        self.verdict = verdict.cloned();
        self
    }

    pub fn decision(mut self, decision: Option<&ApprovalDecision>) -> Self {
        self.decision = decision.cloned();
        self
    }

    pub fn install(mut self, install: Option<&InstallOutcome>) -> Self {
        self.install = install.cloned();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

pub struct AuditLog {
    path: PathBuf,
    append: Mutex<()>,
}

impl AuditLog {
    pub fn new(root: &Path) -> Self {
        Self::at(paths::audit_path(root))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _g = self.append.lock().unwrap_or_else(|p| p.into_inner());
        io::append_line(&self.path, &line)?;
        tracing::debug!(
            id = %record.id,
            action = %record.action,
            outcome = %record.outcome,
            "audit record appended"
        );
        Ok(())
    }

    /// All records, oldest first. Lines that fail to parse are skipped with
    /// a warning so one damaged line does not hide the rest of the trail.
    pub fn read(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for (i, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!(line = i + 1, error = %e, "skipping unreadable audit line"),
            }
        }
        Ok(records)
    }

    /// The newest `limit` records, oldest first. `limit = 0` returns all.
    pub fn tail(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut records = self.read()?;
        if limit > 0 && records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
