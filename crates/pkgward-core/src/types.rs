use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

/// Ordered so that `max` raises the level; rules never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RecommendedAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    AutoAllow,
    RequireReview,
    Reject,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendedAction::AutoAllow => "auto-allow",
            RecommendedAction::RequireReview => "require-review",
            RecommendedAction::Reject => "reject",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// VersionSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum VersionSpec {
    Latest,
    Exact(String),
}

impl VersionSpec {
    /// Parse a user-supplied version. `None`, empty and `latest` all mean
    /// the newest release; a leading `==` is tolerated.
    pub fn parse(input: Option<&str>) -> Result<Self> {
        let Some(raw) = input.map(str::trim) else {
            return Ok(VersionSpec::Latest);
        };
        if raw.is_empty() || raw.eq_ignore_ascii_case("latest") {
            return Ok(VersionSpec::Latest);
        }
        let raw = raw.strip_prefix("==").unwrap_or(raw);
        paths::validate_version(raw)?;
        Ok(VersionSpec::Exact(raw.to_string()))
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => f.write_str("latest"),
            VersionSpec::Exact(v) => f.write_str(v),
        }
    }
}

// ---------------------------------------------------------------------------
// InstallRequest
// ---------------------------------------------------------------------------

/// One user command to install a package. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub package: String,
    pub version: VersionSpec,
    pub env: String,
    pub requester: String,
    /// Create `env` if it does not exist yet.
    #[serde(default)]
    pub create_env: bool,
    /// Reinstall even if the resolved version is already present.
    #[serde(default)]
    pub force: bool,
}

impl InstallRequest {
    pub fn new(
        package: impl Into<String>,
        version: VersionSpec,
        env: impl Into<String>,
        requester: impl Into<String>,
    ) -> Result<Self> {
        let package = package.into();
        let env = env.into();
        paths::validate_name(&package)?;
        paths::validate_name(&env)?;
        Ok(Self {
            package,
            version,
            env,
            requester: requester.into(),
            create_env: false,
            force: false,
        })
    }

    pub fn with_create_env(mut self, create_env: bool) -> Self {
        self.create_env = create_env;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResponse {
    Approved,
    Denied,
}

impl fmt::Display for ApprovalResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalResponse::Approved => f.write_str("approved"),
            ApprovalResponse::Denied => f.write_str("denied"),
        }
    }
}

/// How a decision came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Synthesized by policy without prompting (low risk + auto-allow).
    Policy,
    /// Explicit operator answer.
    Operator,
    /// No answer before the gate timeout.
    Timeout,
    /// Input closed before an answer arrived.
    Closed,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
