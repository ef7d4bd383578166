//! Human approval checkpoint in front of every risky install.
//!
//! The gate always renders the full verdict through the prompt before it
//! asks for an answer. Anything other than an explicit yes, including a
//! timeout or closed input, resolves to a denial.

use crate::security::RiskVerdict;
use crate::types::{ApprovalResponse, DecisionSource, InstallRequest, RecommendedAction, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptAnswer {
    Line(String),
    TimedOut,
    Closed,
}

/// Where the gate shows verdicts and reads operator answers.
pub trait Prompt: Send + Sync {
    fn show(&self, text: &str);
    /// Ask `question` and wait up to `timeout` (`None` = forever).
    fn ask(&self, question: &str, timeout: Option<Duration>) -> PromptAnswer;
}

// ---------------------------------------------------------------------------
// ApprovalDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub response: ApprovalResponse,
    pub via: DecisionSource,
    pub at: DateTime<Utc>,
}

impl ApprovalDecision {
    fn new(response: ApprovalResponse, via: DecisionSource) -> Self {
        Self {
            response,
            via,
            at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.response == ApprovalResponse::Approved
    }
}

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

pub struct ApprovalGate {
    prompt: Arc<dyn Prompt>,
    timeout: Option<Duration>,
}

impl ApprovalGate {
    pub fn new(prompt: Arc<dyn Prompt>, timeout: Option<Duration>) -> Self {
        Self { prompt, timeout }
    }

    pub fn request_approval(
        &self,
        request: &InstallRequest,
        verdict: &RiskVerdict,
    ) -> ApprovalDecision {
        match verdict.action {
            // Only a low verdict can carry auto-allow; the level check keeps
            // a hand-built verdict from slipping a high-risk package through.
            RecommendedAction::AutoAllow if verdict.level == RiskLevel::Low => {
                tracing::info!(package = %request.package, "low risk, approved by policy");
                return ApprovalDecision::new(ApprovalResponse::Approved, DecisionSource::Policy);
            }
            RecommendedAction::Reject => {
                return ApprovalDecision::new(ApprovalResponse::Denied, DecisionSource::Policy);
            }
            _ => {}
        }

        self.prompt.show(&render_verdict(request, verdict));
        let question = format!(
            "Install {} {} into '{}'? [y/N]",
            verdict.package, verdict.version, request.env
        );
        let decision = match self.prompt.ask(&question, self.timeout) {
            PromptAnswer::Line(line) => {
                let answer = line.trim().to_lowercase();
                if answer == "y" || answer == "yes" {
                    ApprovalDecision::new(ApprovalResponse::Approved, DecisionSource::Operator)
                } else {
                    ApprovalDecision::new(ApprovalResponse::Denied, DecisionSource::Operator)
                }
            }
            PromptAnswer::TimedOut => {
                tracing::warn!(package = %request.package, "approval timed out");
                ApprovalDecision::new(ApprovalResponse::Denied, DecisionSource::Timeout)
            }
            PromptAnswer::Closed => {
                ApprovalDecision::new(ApprovalResponse::Denied, DecisionSource::Closed)
            }
        };
        tracing::info!(
            package = %request.package,
            response = %decision.response,
            via = ?decision.via,
            "approval decision"
        );
        decision
    }
}

/// Human-readable block describing the request and every finding.
pub fn render_verdict(request: &InstallRequest, verdict: &RiskVerdict) -> String {
    let mut out = String::new();
    out.push_str("PACKAGE INSTALLATION REQUEST\n");
    out.push_str(&format!("  package:     {}\n", verdict.package));
    out.push_str(&format!("  version:     {}\n", verdict.version));
    out.push_str(&format!("  environment: {}\n", request.env));
    out.push_str(&format!("  requested by: {}\n", request.requester));
    out.push_str(&format!("  risk:        {}\n", verdict.level.as_str().to_uppercase()));
    out.push_str(&format!("  recommended: {}\n", verdict.action));
    if verdict.findings.is_empty() {
        out.push_str("  findings:    none\n");
    } else {
        out.push_str("  findings:\n");
        for f in &verdict.findings {
            out.push_str(&format!("    - [{}] {}: {}\n", f.level, f.rule, f.reason));
        }
    }
    out.push_str(&format!("  rationale:   {}\n", verdict.rationale));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
