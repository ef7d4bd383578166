use super::{finish, open_pipeline};
use crate::output::print_verdict;
use anyhow::Context;
use pkgward_core::audit::AuditAction;
use pkgward_core::types::VersionSpec;
use std::path::Path;

/// Evaluate a package without installing it.
pub fn run(
    root: &Path,
    package: &str,
    version: Option<String>,
    env: Option<String>,
    json: bool,
) -> anyhow::Result<i32> {
    let pipeline = open_pipeline(root, json)?;
    let report = match VersionSpec::parse(version.as_deref()) {
        Ok(spec) => pipeline.verify(package, &spec, env.as_deref()),
        Err(e) => pipeline.reject_invalid(AuditAction::Verify, env.as_deref(), &e),
    }
    .with_context(|| format!("failed to record verification of '{package}'"))?;

    if !json {
        if let Some(verdict) = &report.verdict {
            print_verdict(verdict);
            return Ok(report.exit_code());
        }
    }
    finish(&report, json)
}
