//! Request orchestration: fetch, evaluate, approve, install, audit.
//!
//! Every public operation writes exactly one audit record, whatever path it
//! takes. Failures that belong to the request (denied, not found, registry
//! down) come back inside the `Report`; only a failure to write the audit
//! record itself is returned as an error.

use crate::approval::{ApprovalDecision, ApprovalGate, Prompt};
use crate::audit::{AuditAction, AuditLog, AuditOutcome, AuditRecord};
use crate::backend::{Backend, ManifestBackend, PipBackend};
use crate::config::{BackendKind, Config, RegistrySource};
use crate::environment::{Environment, EnvironmentStore};
use crate::error::{PkgError, Result};
use crate::installer::{InstallOutcome, Installer};
use crate::lock::EnvLocks;
use crate::metadata::PackageMetadata;
use crate::pypi::PypiRegistry;
use crate::registry::{fetch_with_retry, IndexRegistry, Registry, RetryPolicy};
use crate::security::{Evaluator, RiskVerdict};
use crate::types::{InstallRequest, VersionSpec};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What happened to one request, mirrored 1:1 by its audit record.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub audit_id: Uuid,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PackageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<RiskVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    fn new(action: AuditAction, env: Option<&str>) -> Self {
        Self {
            audit_id: Uuid::nil(),
            action,
            outcome: AuditOutcome::Error,
            env: env.map(String::from),
            metadata: None,
            verdict: None,
            decision: None,
            install: None,
            environment: None,
            error: None,
        }
    }

    fn failed(mut self, err: &PkgError) -> Self {
        self.outcome = outcome_for_error(err);
        self.error = Some(err.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn exit_code(&self) -> i32 {
        exit_code(self.outcome)
    }
}

/// Process status for an outcome: 0 success, 1 denied, 2 install failed,
/// 3 rejected by policy, then one code per remaining failure class.
pub fn exit_code(outcome: AuditOutcome) -> i32 {
    match outcome {
        AuditOutcome::Installed
        | AuditOutcome::AlreadyInstalled
        | AuditOutcome::Verified
        | AuditOutcome::Uninstalled
        | AuditOutcome::EnvCreated
        | AuditOutcome::EnvRemoved => 0,
        AuditOutcome::Denied => 1,
        AuditOutcome::InstallFailed => 2,
        AuditOutcome::PolicyRejected => 3,
        AuditOutcome::NotFound => 4,
        AuditOutcome::RegistryUnavailable => 5,
        AuditOutcome::Conflict => 6,
        AuditOutcome::AlreadyExists => 7,
        AuditOutcome::Invalid => 8,
        AuditOutcome::Error => 10,
    }
}

pub fn outcome_for_error(err: &PkgError) -> AuditOutcome {
    match err {
        PkgError::EnvironmentNotFound(_) | PkgError::PackageNotFound(_) => AuditOutcome::NotFound,
        PkgError::EnvironmentExists(_) => AuditOutcome::AlreadyExists,
        PkgError::RegistryUnavailable(_) => AuditOutcome::RegistryUnavailable,
        PkgError::PolicyRejected(_) => AuditOutcome::PolicyRejected,
        PkgError::ApprovalDenied(_) => AuditOutcome::Denied,
        PkgError::InstallFailed(_) | PkgError::Backend(_) => AuditOutcome::InstallFailed,
        PkgError::ConcurrencyConflict(_) => AuditOutcome::Conflict,
        PkgError::InvalidName(_) | PkgError::InvalidVersion(_) | PkgError::InvalidArgument(_) => {
            AuditOutcome::Invalid
        }
        PkgError::Io(_) | PkgError::Yaml(_) | PkgError::Json(_) => AuditOutcome::Error,
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    config: Config,
    registry: Arc<dyn Registry>,
    retry: RetryPolicy,
    evaluator: Evaluator,
    gate: ApprovalGate,
    installer: Installer,
    audit: AuditLog,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        root: &Path,
        config: Config,
        registry: Arc<dyn Registry>,
        backend: Arc<dyn Backend>,
        prompt: Arc<dyn Prompt>,
    ) -> Self {
        let store = Arc::new(EnvironmentStore::new(root));
        let installer = Installer::new(
            store,
            backend,
            EnvLocks::new(),
            config.installer.lock_timeout(),
            config.installer.python.clone(),
        );
        Self {
            retry: RetryPolicy::new(
                config.registry.retries,
                Duration::from_millis(config.registry.backoff_ms),
            ),
            evaluator: Evaluator::new(config.policy.clone()),
            gate: ApprovalGate::new(prompt, config.gate.timeout()),
            registry,
            installer,
            audit: AuditLog::new(root),
            config,
        }
    }

    /// Build the registry and backend named by `config`.
    pub fn from_config(root: &Path, config: Config, prompt: Arc<dyn Prompt>) -> Result<Self> {
        let registry: Arc<dyn Registry> = match &config.registry.source {
            RegistrySource::Pypi {
                url,
                stats_url,
                timeout_seconds,
            } => Arc::new(PypiRegistry::new(
                url,
                stats_url.as_deref(),
                Duration::from_secs(*timeout_seconds as u64),
            )?),
            RegistrySource::Index { path } => Arc::new(IndexRegistry::new(root.join(path))),
        };
        let backend: Arc<dyn Backend> = match config.installer.backend {
            BackendKind::Pip => Arc::new(PipBackend::new(
                config.installer.python.clone(),
                config.installer.command_timeout(),
            )),
            BackendKind::Manifest => Arc::new(ManifestBackend),
        };
        Ok(Self::new(root, config, registry, backend, prompt))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &EnvironmentStore {
        self.installer.store()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    // -----------------------------------------------------------------------
    // install
    // -----------------------------------------------------------------------

    pub fn install(&self, request: &InstallRequest) -> Result<Report> {
        let mut report = Report::new(AuditAction::Install, Some(&request.env));
        report = self.run_install(request, report);
        let record = AuditRecord::new(AuditAction::Install, report.outcome)
            .request(request)
            .verdict(report.verdict.as_ref())
            .decision(report.decision.as_ref())
            .install(report.install.as_ref());
        self.finish(report, record)
    }

    fn run_install(&self, request: &InstallRequest, mut report: Report) -> Report {
        // Asking an operator about an install that cannot happen wastes
        // their time; the installer re-checks under the lock.
        if !request.create_env && !self.store().exists(&request.env) {
            return report.failed(&PkgError::EnvironmentNotFound(request.env.clone()));
        }

        let metadata = match self.fetch(&request.package, &request.version) {
            Ok(m) => m,
            Err(e) => return report.failed(&e),
        };

        let verdict = self.evaluator.evaluate(&metadata);
        tracing::info!(
            package = %verdict.package,
            version = %verdict.version,
            level = %verdict.level,
            action = %verdict.action,
            "risk evaluated"
        );
        report.metadata = Some(metadata.clone());
        report.verdict = Some(verdict.clone());

        if verdict.is_rejected() {
            let err = PkgError::PolicyRejected(format!(
                "{} {} is {} risk: {}",
                verdict.package, verdict.version, verdict.level, verdict.rationale
            ));
            return report.failed(&err);
        }

        let decision = self.gate.request_approval(request, &verdict);
        let approved = decision.is_approved();
        report.decision = Some(decision);
        if !approved {
            return report.failed(&PkgError::ApprovalDenied(format!(
                "{} {} was not approved",
                verdict.package, verdict.version
            )));
        }

        match self.installer.install(request, &metadata) {
            Ok(outcome) => {
                report.outcome = match &outcome {
                    InstallOutcome::Installed { .. } => AuditOutcome::Installed,
                    InstallOutcome::AlreadyInstalled { .. } => AuditOutcome::AlreadyInstalled,
                    InstallOutcome::Failed { error, .. } => {
                        report.error = Some(error.clone());
                        AuditOutcome::InstallFailed
                    }
                };
                report.install = Some(outcome);
                report
            }
            Err(e) => report.failed(&e),
        }
    }

    // -----------------------------------------------------------------------
    // verify
    // -----------------------------------------------------------------------

    /// Fetch and evaluate without installing anything.
    pub fn verify(&self, package: &str, version: &VersionSpec, env: Option<&str>) -> Result<Report> {
        let mut report = Report::new(AuditAction::Verify, env);
        let fetched = crate::paths::validate_name(package).and_then(|_| self.fetch(package, version));
        match fetched {
            Ok(metadata) => {
                let verdict = self.evaluator.evaluate(&metadata);
                report.outcome = AuditOutcome::Verified;
                report.metadata = Some(metadata);
                report.verdict = Some(verdict);
            }
            Err(e) => report = report.failed(&e),
        }
        let mut record = AuditRecord::new(AuditAction::Verify, report.outcome)
            .verdict(report.verdict.as_ref())
            .detail(format!("{package} {version}"));
        record.env = env.map(String::from);
        self.finish(report, record)
    }

    // -----------------------------------------------------------------------
    // environments
    // -----------------------------------------------------------------------

    pub fn create_env(&self, id: &str, interpreter: Option<&str>) -> Result<Report> {
        let mut report = Report::new(AuditAction::CreateEnv, Some(id));
        match self.installer.create_env(id, interpreter) {
            Ok(env) => {
                report.outcome = AuditOutcome::EnvCreated;
                report.environment = Some(env);
            }
            Err(e) => report = report.failed(&e),
        }
        let mut record = AuditRecord::new(AuditAction::CreateEnv, report.outcome).env(id);
        if let Some(env) = &report.environment {
            record = record.detail(format!("interpreter {}", env.interpreter));
        }
        self.finish(report, record)
    }

    pub fn remove_env(&self, id: &str) -> Result<Report> {
        let mut report = Report::new(AuditAction::RemoveEnv, Some(id));
        match self.installer.remove_env(id) {
            Ok(()) => report.outcome = AuditOutcome::EnvRemoved,
            Err(e) => report = report.failed(&e),
        }
        let record = AuditRecord::new(AuditAction::RemoveEnv, report.outcome).env(id);
        self.finish(report, record)
    }

    pub fn uninstall(&self, env: &str, package: &str) -> Result<Report> {
        let mut report = Report::new(AuditAction::Uninstall, Some(env));
        match self.installer.uninstall(env, package) {
            Ok(updated) => {
                report.outcome = AuditOutcome::Uninstalled;
                report.environment = Some(updated);
            }
            Err(e) => report = report.failed(&e),
        }
        let record = AuditRecord::new(AuditAction::Uninstall, report.outcome)
            .env(env)
            .detail(package.to_string());
        self.finish(report, record)
    }

    /// Audit a request that never made it past argument validation.
    pub fn reject_invalid(&self, action: AuditAction, env: Option<&str>, err: &PkgError) -> Result<Report> {
        let report = Report::new(action, env).failed(err);
        let mut record = AuditRecord::new(action, report.outcome);
        record.env = env.map(String::from);
        self.finish(report, record)
    }

    // -----------------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------------

    fn fetch(&self, package: &str, version: &VersionSpec) -> Result<PackageMetadata> {
        fetch_with_retry(self.registry.as_ref(), package, version, self.retry)
    }

    fn finish(&self, mut report: Report, mut record: AuditRecord) -> Result<Report> {
        if let Some(err) = &report.error {
            if record.detail.is_none() {
                record.detail = Some(err.clone());
            } else if !report.is_success() {
                record.detail = record.detail.map(|d| format!("{d}: {err}"));
            }
        }
        self.audit.append(&record).map_err(|e| {
            tracing::error!(error = %e, action = %record.action, "audit append failed");
            e
        })?;
        report.audit_id = record.id;
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::PromptAnswer;
    use crate::test_support::{established, suspicious, BrokenBackend, ScriptedPrompt, StaticRegistry};
    use crate::types::{DecisionSource, RiskLevel};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn config(auto_allow_low: bool) -> Config {
        let mut cfg = Config::new();
        cfg.policy.auto_allow_low = auto_allow_low;
        cfg.registry.backoff_ms = 0;
        cfg.installer.backend = BackendKind::Manifest;
        cfg.installer.lock_timeout_seconds = 2;
        cfg
    }

    fn pipeline(
        dir: &TempDir,
        cfg: Config,
        registry: Arc<dyn Registry>,
        prompt: Arc<dyn Prompt>,
    ) -> Pipeline {
        Pipeline::new(dir.path(), cfg, registry, Arc::new(ManifestBackend), prompt)
    }

    fn request(pkg: &str, env: &str) -> InstallRequest {
        InstallRequest::new(pkg, VersionSpec::Latest, env, "tester").unwrap()
    }

    fn registry() -> Arc<StaticRegistry> {
        Arc::new(StaticRegistry::new(vec![
            established("pandas", "2.2.0"),
            established("numpy", "1.26.0"),
            suspicious("keylogger-utils", "0.1.0"),
        ]))
    }

    #[test]
    fn low_risk_is_auto_allowed_and_installed() {
        let dir = TempDir::new().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new(vec![]));
        let p = pipeline(&dir, config(true), registry(), prompt.clone());
        p.create_env("default", None).unwrap();

        let report = p.install(&request("pandas", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::Installed);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.verdict.as_ref().unwrap().level, RiskLevel::Low);
        assert_eq!(report.decision.as_ref().unwrap().via, DecisionSource::Policy);
        assert_eq!(prompt.asked(), 0);

        let env = p.store().get("default").unwrap();
        assert_eq!(env.installed_version("pandas"), Some("2.2.0"));

        let records = p.audit_log().read().unwrap();
        let last = records.last().unwrap();
        assert_eq!(last.action, AuditAction::Install);
        assert_eq!(last.outcome, AuditOutcome::Installed);
        assert_eq!(last.id, report.audit_id);
        assert!(matches!(
            last.install,
            Some(InstallOutcome::Installed { ref version, .. }) if version == "2.2.0"
        ));
    }

    #[test]
    fn high_risk_prompts_with_rationale_and_denial_exits_one() {
        let dir = TempDir::new().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new(vec![PromptAnswer::Line("n".into())]));
        let p = pipeline(&dir, config(true), registry(), prompt.clone());
        p.create_env("default", None).unwrap();

        let report = p.install(&request("keylogger-utils", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::Denied);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.verdict.as_ref().unwrap().level, RiskLevel::High);
        assert!(prompt.shown_before_first_ask());
        assert!(prompt.shown()[0].contains("keylog"));

        let env = p.store().get("default").unwrap();
        assert!(env.packages.is_empty());
        let last = p.audit_log().read().unwrap().pop().unwrap();
        assert_eq!(last.outcome, AuditOutcome::Denied);
        assert!(last.decision.is_some());
    }

    #[test]
    fn high_risk_approved_by_operator_installs() {
        let dir = TempDir::new().unwrap();
        let prompt = Arc::new(ScriptedPrompt::yes());
        let p = pipeline(&dir, config(true), registry(), prompt);
        p.create_env("default", None).unwrap();
        let report = p.install(&request("keylogger-utils", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::Installed);
        assert_eq!(report.decision.unwrap().via, DecisionSource::Operator);
    }

    #[test]
    fn remove_missing_env_is_not_found_and_audited() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, config(false), registry(), Arc::new(ScriptedPrompt::new(vec![])));
        let report = p.remove_env("nonexistent").unwrap();
        assert_eq!(report.outcome, AuditOutcome::NotFound);
        assert_ne!(report.exit_code(), 0);

        let records = p.audit_log().read().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::RemoveEnv);
        assert_eq!(records[0].env.as_deref(), Some("nonexistent"));
        assert!(records[0].detail.as_deref().unwrap().contains("not found"));
    }

    #[test]
    fn registry_outages_are_retried() {
        let dir = TempDir::new().unwrap();
        let reg = Arc::new(StaticRegistry::new(vec![established("pandas", "2.2.0")]).with_outages(2));
        let p = pipeline(&dir, config(true), reg.clone(), Arc::new(ScriptedPrompt::new(vec![])));
        p.create_env("default", None).unwrap();

        let report = p.install(&request("pandas", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::Installed);
        assert_eq!(reg.calls(), 3);
    }

    #[test]
    fn exhausted_retries_report_registry_unavailable() {
        let dir = TempDir::new().unwrap();
        let reg = Arc::new(StaticRegistry::new(vec![established("pandas", "2.2.0")]).with_outages(5));
        let p = pipeline(&dir, config(true), reg.clone(), Arc::new(ScriptedPrompt::new(vec![])));
        p.create_env("default", None).unwrap();

        let report = p.install(&request("pandas", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::RegistryUnavailable);
        assert_eq!(report.exit_code(), 5);
        assert_eq!(reg.calls(), 3);
    }

    #[test]
    fn reject_high_skips_the_prompt() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(true);
        cfg.policy.reject_high = true;
        let prompt = Arc::new(ScriptedPrompt::new(vec![]));
        let p = pipeline(&dir, cfg, registry(), prompt.clone());
        p.create_env("default", None).unwrap();

        let report = p.install(&request("keylogger-utils", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::PolicyRejected);
        assert_eq!(report.exit_code(), 3);
        assert_eq!(prompt.asked(), 0);
    }

    #[test]
    fn missing_env_fails_before_prompt() {
        let dir = TempDir::new().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new(vec![]));
        let p = pipeline(&dir, config(false), registry(), prompt.clone());
        let report = p.install(&request("pandas", "ghost")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::NotFound);
        assert_eq!(prompt.asked(), 0);
        assert_eq!(p.audit_log().read().unwrap().len(), 1);
    }

    #[test]
    fn unknown_package_is_not_found() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, config(true), registry(), Arc::new(ScriptedPrompt::new(vec![])));
        p.create_env("default", None).unwrap();
        let report = p.install(&request("no-such-package", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::NotFound);
        assert_eq!(report.exit_code(), 4);
    }

    #[test]
    fn failed_install_exits_two_and_leaves_env_unchanged() {
        let dir = TempDir::new().unwrap();
        let p = Pipeline::new(
            dir.path(),
            config(true),
            registry(),
            Arc::new(BrokenBackend),
            Arc::new(ScriptedPrompt::new(vec![])),
        );
        p.create_env("default", None).unwrap();
        let before = p.store().get("default").unwrap().packages;

        let report = p.install(&request("pandas", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::InstallFailed);
        assert_eq!(report.exit_code(), 2);
        assert!(matches!(
            report.install,
            Some(InstallOutcome::Failed { rolled_back: true, .. })
        ));
        assert_eq!(p.store().get("default").unwrap().packages, before);

        // The trail on disk carries the rollback result, not just the cause.
        let raw = std::fs::read_to_string(p.audit_log().path()).unwrap();
        let line = raw.lines().last().unwrap();
        assert!(line.contains(r#""rolled_back":true"#), "{line}");
        let last = p.audit_log().read().unwrap().pop().unwrap();
        assert_eq!(last.outcome, AuditOutcome::InstallFailed);
        assert_eq!(last.install, report.install);
        assert!(last.detail.unwrap().contains("install failed"));
    }

    #[test]
    fn every_path_writes_exactly_one_record() {
        let dir = TempDir::new().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new(vec![PromptAnswer::TimedOut]));
        let p = pipeline(&dir, config(true), registry(), prompt);

        let mut expected = 0;
        let mut step = |report: Report| {
            expected += 1;
            assert_eq!(p.audit_log().read().unwrap().len(), expected, "{report:?}");
        };
        step(p.create_env("default", None).unwrap());
        step(p.create_env("default", None).unwrap());
        step(p.install(&request("pandas", "default")).unwrap());
        step(p.install(&request("pandas", "default")).unwrap());
        step(p.install(&request("keylogger-utils", "default")).unwrap());
        step(p.verify("numpy", &VersionSpec::Latest, None).unwrap());
        step(p.uninstall("default", "pandas").unwrap());
        step(p.uninstall("default", "pandas").unwrap());
        step(p.remove_env("default").unwrap());
        step(p.remove_env("default").unwrap());
        step(
            p.reject_invalid(
                AuditAction::Install,
                None,
                &PkgError::InvalidName("../x".into()),
            )
            .unwrap(),
        );

        let outcomes: Vec<_> = p
            .audit_log()
            .read()
            .unwrap()
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![
                AuditOutcome::EnvCreated,
                AuditOutcome::AlreadyExists,
                AuditOutcome::Installed,
                AuditOutcome::AlreadyInstalled,
                AuditOutcome::Denied,
                AuditOutcome::Verified,
                AuditOutcome::Uninstalled,
                AuditOutcome::NotFound,
                AuditOutcome::EnvRemoved,
                AuditOutcome::NotFound,
                AuditOutcome::Invalid,
            ]
        );
    }

    #[test]
    fn audit_failure_fails_the_operation() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, config(true), registry(), Arc::new(ScriptedPrompt::new(vec![])));
        // A directory where the log file should be makes every append fail.
        std::fs::create_dir_all(crate::paths::audit_path(dir.path())).unwrap();
        assert!(p.remove_env("nonexistent").is_err());
    }

    #[test]
    fn verify_reports_verdict_without_installing() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, config(true), registry(), Arc::new(ScriptedPrompt::new(vec![])));
        let report = p
            .verify("keylogger-utils", &VersionSpec::Latest, Some("default"))
            .unwrap();
        assert_eq!(report.outcome, AuditOutcome::Verified);
        assert_eq!(report.verdict.unwrap().level, RiskLevel::High);
        assert!(!p.store().exists("default"));
    }

    /// Blocks in `ask` until the test sends an answer.
    struct HeldPrompt {
        entered: Mutex<mpsc::Sender<()>>,
        answer: Mutex<mpsc::Receiver<String>>,
    }

    impl Prompt for HeldPrompt {
        fn show(&self, _text: &str) {}

        fn ask(&self, _question: &str, _timeout: Option<Duration>) -> PromptAnswer {
            let _ = self.entered.lock().unwrap().send(());
            match self.answer.lock().unwrap().recv() {
                Ok(line) => PromptAnswer::Line(line),
                Err(_) => PromptAnswer::Closed,
            }
        }
    }

    #[test]
    fn pending_approval_does_not_hold_the_env_lock() {
        let dir = TempDir::new().unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (answer_tx, answer_rx) = mpsc::channel();
        let prompt = Arc::new(HeldPrompt {
            entered: Mutex::new(entered_tx),
            answer: Mutex::new(answer_rx),
        });
        let p = Arc::new(pipeline(&dir, config(true), registry(), prompt));
        p.create_env("default", None).unwrap();

        let risky = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || p.install(&request("keylogger-utils", "default")).unwrap())
        };
        entered_rx.recv().unwrap();

        // The first request is parked at the gate; the same env stays usable.
        let report = p.install(&request("pandas", "default")).unwrap();
        assert_eq!(report.outcome, AuditOutcome::Installed);

        answer_tx.send("yes".into()).unwrap();
        let risky = risky.join().unwrap();
        assert_eq!(risky.outcome, AuditOutcome::Installed);

        let env = p.store().get("default").unwrap();
        assert_eq!(env.packages.len(), 2);
    }

    #[test]
    fn installs_into_different_envs_run_concurrently() {
        let dir = TempDir::new().unwrap();
        let p = Arc::new(pipeline(
            &dir,
            config(true),
            registry(),
            Arc::new(ScriptedPrompt::new(vec![])),
        ));
        let envs = ["a", "b", "c", "d"];
        for env in envs {
            p.create_env(env, None).unwrap();
        }
        let handles: Vec<_> = envs
            .iter()
            .map(|env| {
                let p = Arc::clone(&p);
                let env = env.to_string();
                std::thread::spawn(move || p.install(&request("numpy", &env)).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().outcome, AuditOutcome::Installed);
        }
        assert_eq!(p.audit_log().read().unwrap().len(), envs.len() * 2);
    }
}
