//! Rule-based risk evaluation of package metadata.
//!
//! Rules run in a fixed order. Each rule that fires contributes a finding
//! and can only raise the running risk level, never lower it. Evaluation
//! is a pure function of the metadata and the policy tables.

use crate::config::PolicyConfig;
use crate::metadata::{compare_versions, PackageMetadata};
use crate::types::{RecommendedAction, RiskLevel};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// RuleContext / Rule
// ---------------------------------------------------------------------------

pub struct RuleContext<'a> {
    pub metadata: &'a PackageMetadata,
    pub policy: &'a PolicyConfig,
}

/// A fn-pointer rule. `check` returns the reason when the rule fires.
pub struct Rule {
    pub id: &'static str,
    pub level: RiskLevel,
    pub check: fn(&RuleContext) -> Option<String>,
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub level: RiskLevel,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub package: String,
    pub version: String,
    pub level: RiskLevel,
    pub matched_rules: Vec<String>,
    pub findings: Vec<Finding>,
    pub rationale: String,
    pub action: RecommendedAction,
}

impl RiskVerdict {
    pub fn is_rejected(&self) -> bool {
        self.action == RecommendedAction::Reject
    }
}

// ---------------------------------------------------------------------------
// Rule helpers
// ---------------------------------------------------------------------------

/// First blocklist pattern contained in `text`, case-insensitively.
fn blocklisted<'p>(text: &str, blocklist: &'p [String]) -> Option<&'p str> {
    let lower = text.to_lowercase();
    blocklist
        .iter()
        .map(|p| p.trim())
        .find(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
}

fn suspicious_name(ctx: &RuleContext) -> Option<String> {
    blocklisted(&ctx.metadata.name, &ctx.policy.blocklist)
        .map(|p| format!("suspicious name pattern '{p}'"))
}

fn recent_release(ctx: &RuleContext) -> Option<String> {
    let min = ctx.policy.min_age_days as i64;
    match ctx.metadata.age_days() {
        None => Some("publication date unknown".to_string()),
        Some(age) if age < min => Some(format!(
            "published {age} day(s) ago (minimum {min})"
        )),
        Some(_) => None,
    }
}

fn low_downloads(ctx: &RuleContext) -> Option<String> {
    let min = ctx.policy.min_downloads;
    match ctx.metadata.downloads {
        None => Some("download count unavailable".to_string()),
        Some(n) if n < min => Some(format!("only {n} recent download(s) (minimum {min})")),
        Some(_) => None,
    }
}

fn missing_license(ctx: &RuleContext) -> Option<String> {
    if ctx.metadata.declared_license().is_none() {
        Some("no license declared".to_string())
    } else {
        None
    }
}

fn flagged_dependency(ctx: &RuleContext) -> Option<String> {
    let flagged: Vec<String> = ctx
        .metadata
        .dependencies
        .iter()
        .filter_map(|dep| {
            blocklisted(dep, &ctx.policy.blocklist).map(|p| format!("{dep} ('{p}')"))
        })
        .collect();
    if flagged.is_empty() {
        None
    } else {
        Some(format!("depends on flagged package(s): {}", flagged.join(", ")))
    }
}

fn known_vulnerability(ctx: &RuleContext) -> Option<String> {
    let name = ctx.metadata.name.to_lowercase();
    let safe = ctx
        .policy
        .advisories
        .iter()
        .find(|(pkg, _)| pkg.to_lowercase() == name)
        .map(|(_, v)| v)?;
    if compare_versions(&ctx.metadata.version, safe) == Ordering::Less {
        Some(format!(
            "version {} has known vulnerabilities (upgrade to {safe} or later)",
            ctx.metadata.version
        ))
    } else {
        None
    }
}

fn suspicious_summary(ctx: &RuleContext) -> Option<String> {
    let summary = ctx.metadata.summary.as_deref()?;
    blocklisted(summary, &ctx.policy.blocklist)
        .map(|p| format!("suspicious keyword '{p}' in summary"))
}

/// File endings that have no business in a Python distribution.
const SUSPICIOUS_EXTENSIONS: &[&str] = &[
    ".exe", ".dll", ".so", ".dylib", ".app", ".scr", ".bat", ".cmd", ".ps1",
];

/// Legacy binary formats that install opaque payloads.
const OPAQUE_PACKAGE_TYPES: &[&str] = &["bdist_dumb", "bdist_wininst"];

fn suspicious_file_type(ctx: &RuleContext) -> Option<String> {
    let flagged: Vec<String> = ctx
        .metadata
        .files
        .iter()
        .filter_map(|f| {
            let lower = f.filename.to_lowercase();
            if let Some(ext) = SUSPICIOUS_EXTENSIONS.iter().find(|e| lower.ends_with(*e)) {
                return Some(format!("{} ({ext})", f.filename));
            }
            f.packagetype
                .as_deref()
                .filter(|t| OPAQUE_PACKAGE_TYPES.contains(t))
                .map(|t| format!("{} ({t})", f.filename))
        })
        .collect();
    if flagged.is_empty() {
        None
    } else {
        Some(format!("suspicious release file(s): {}", flagged.join(", ")))
    }
}

fn untrusted_file_host(ctx: &RuleContext) -> Option<String> {
    let mut hosts: Vec<String> = ctx
        .metadata
        .files
        .iter()
        .filter_map(|f| f.host())
        .filter(|h| !ctx.policy.trusted_hosts.iter().any(|t| t.eq_ignore_ascii_case(h)))
        .collect();
    hosts.sort();
    hosts.dedup();
    if hosts.is_empty() {
        None
    } else {
        Some(format!("files hosted outside trusted hosts: {}", hosts.join(", ")))
    }
}

fn oversized_file(ctx: &RuleContext) -> Option<String> {
    let limit = ctx.policy.max_file_mb.saturating_mul(1024 * 1024);
    let largest = ctx
        .metadata
        .files
        .iter()
        .filter_map(|f| f.size.map(|s| (s, &f.filename)))
        .filter(|(s, _)| *s > limit)
        .max_by_key(|(s, _)| *s)?;
    Some(format!(
        "{} is {} bytes (limit {} MiB)",
        largest.1, largest.0, ctx.policy.max_file_mb
    ))
}

fn missing_source_link(ctx: &RuleContext) -> Option<String> {
    // Registries that report no link data at all are not penalised.
    ctx.metadata.project_urls.as_ref()?;
    if ctx.metadata.source_url().is_none() {
        Some("no source code link among project URLs".to_string())
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Default rule table
// ---------------------------------------------------------------------------

pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "suspicious-name",
            level: RiskLevel::High,
            check: suspicious_name,
        },
        Rule {
            id: "recent-release",
            level: RiskLevel::Medium,
            check: recent_release,
        },
        Rule {
            id: "low-downloads",
            level: RiskLevel::Medium,
            check: low_downloads,
        },
        Rule {
            id: "missing-license",
            level: RiskLevel::Medium,
            check: missing_license,
        },
        Rule {
            id: "flagged-dependency",
            level: RiskLevel::High,
            check: flagged_dependency,
        },
        Rule {
            id: "known-vulnerability",
            level: RiskLevel::High,
            check: known_vulnerability,
        },
        Rule {
            id: "suspicious-summary",
            level: RiskLevel::Medium,
            check: suspicious_summary,
        },
        Rule {
            id: "suspicious-file-type",
            level: RiskLevel::Medium,
            check: suspicious_file_type,
        },
        Rule {
            id: "untrusted-file-host",
            level: RiskLevel::Medium,
            check: untrusted_file_host,
        },
        Rule {
            id: "oversized-file",
            level: RiskLevel::Medium,
            check: oversized_file,
        },
        Rule {
            id: "missing-source-link",
            level: RiskLevel::Medium,
            check: missing_source_link,
        },
    ]
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct Evaluator {
    policy: PolicyConfig,
    rules: Vec<Rule>,
}

impl Evaluator {
    pub fn new(policy: PolicyConfig) -> Self {
        Self::with_rules(policy, default_rules())
    }

    pub fn with_rules(policy: PolicyConfig, rules: Vec<Rule>) -> Self {
        Self { policy, rules }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn evaluate(&self, metadata: &PackageMetadata) -> RiskVerdict {
        let ctx = RuleContext {
            metadata,
            policy: &self.policy,
        };

        let mut level = RiskLevel::Low;
        let mut findings = Vec::new();
        for rule in &self.rules {
            if let Some(reason) = (rule.check)(&ctx) {
                level = level.max(rule.level);
                findings.push(Finding {
                    rule: rule.id.to_string(),
                    level: rule.level,
                    reason,
                });
            }
        }

        let rationale = if findings.is_empty() {
            "no risk indicators found".to_string()
        } else {
            findings
                .iter()
                .map(|f| f.reason.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };

        RiskVerdict {
            package: metadata.name.clone(),
            version: metadata.version.clone(),
            level,
            matched_rules: findings.iter().map(|f| f.rule.clone()).collect(),
            findings,
            rationale,
            action: self.recommend(level),
        }
    }

    /// High risk never maps to auto-allow, whatever the policy says.
    fn recommend(&self, level: RiskLevel) -> RecommendedAction {
        match level {
            RiskLevel::High if self.policy.reject_high => RecommendedAction::Reject,
            RiskLevel::High | RiskLevel::Medium => RecommendedAction::RequireReview,
            RiskLevel::Low if self.policy.auto_allow_low => RecommendedAction::AutoAllow,
            RiskLevel::Low => RecommendedAction::RequireReview,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
