use super::{finish, open_pipeline, parse_kv, pick, requester};
use anyhow::Context;
use pkgward_core::audit::AuditAction;
use pkgward_core::types::{InstallRequest, VersionSpec};
use std::path::Path;

pub struct InstallArgs {
    pub package: String,
    pub version: Option<String>,
    pub env: Option<String>,
    pub create_env: bool,
    pub force: bool,
    /// Trailing `version=...` / `env=...` words.
    pub extra: Vec<String>,
}

pub fn install(root: &Path, args: InstallArgs, json: bool) -> anyhow::Result<i32> {
    let pipeline = open_pipeline(root, json)?;

    // Bad trailing words still reach the audit trail as an invalid request.
    let mut parsed = parse_kv(&args.extra, &["version", "env"]);
    let (version, env) = match &mut parsed {
        Ok(kv) => (pick(args.version, kv, "version"), pick(args.env, kv, "env")),
        Err(_) => (args.version, args.env),
    };
    let env = env.unwrap_or_else(|| pipeline.config().installer.default_env.clone());

    let request = parsed
        .and_then(|_| VersionSpec::parse(version.as_deref()))
        .and_then(|spec| {
            InstallRequest::new(&args.package, spec, &env, requester())
                .map(|r| r.with_create_env(args.create_env).with_force(args.force))
        });
    let report = match request {
        Ok(request) => pipeline.install(&request),
        Err(e) => pipeline.reject_invalid(AuditAction::Install, Some(&env), &e),
    }
    .with_context(|| format!("failed to record install of '{}'", args.package))?;

    finish(&report, json)
}

pub fn uninstall(root: &Path, package: &str, env: Option<String>, json: bool) -> anyhow::Result<i32> {
    let pipeline = open_pipeline(root, json)?;
    let env = env.unwrap_or_else(|| pipeline.config().installer.default_env.clone());
    let report = pipeline
        .uninstall(&env, package)
        .with_context(|| format!("failed to record uninstall of '{package}'"))?;
    finish(&report, json)
}
