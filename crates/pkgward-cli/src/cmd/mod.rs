pub mod audit;
pub mod config;
pub mod env;
pub mod init;
pub mod install;
pub mod packages;
pub mod verify;

use crate::output::print_report;
use crate::prompt::TerminalPrompt;
use anyhow::Context;
use pkgward_core::config::Config;
use pkgward_core::pipeline::{Pipeline, Report};
use pkgward_core::PkgError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const EXIT_OK: i32 = 0;
pub const EXIT_INVALID: i32 = 8;
pub const EXIT_ERROR: i32 = 10;

/// A command refused its input without producing a report.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Split trailing `key=value` words, accepting only `allowed` keys.
///
/// The error is a domain error so commands can audit the rejected request
/// like any other invalid input.
pub fn parse_kv(args: &[String], allowed: &[&str]) -> Result<BTreeMap<String, String>, PkgError> {
    let mut out = BTreeMap::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(PkgError::InvalidArgument(format!("unexpected argument '{arg}'")));
        };
        if !allowed.contains(&key) {
            return Err(PkgError::InvalidArgument(format!(
                "unknown option '{key}' (expected one of: {})",
                allowed.join(", ")
            )));
        }
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// Prefer the flag value, then the `key=value` form.
pub fn pick(flag: Option<String>, kv: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    let from_kv = kv.remove(key);
    flag.or(from_kv)
}

pub fn open_pipeline(root: &Path, json: bool) -> anyhow::Result<Pipeline> {
    let config = Config::load_or_default(root).context("failed to load config")?;
    let prompt = Arc::new(TerminalPrompt::new(json));
    Pipeline::from_config(root, config, prompt).context("failed to set up install pipeline")
}

pub fn requester() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Print the report and hand back its exit status.
pub fn finish(report: &Report, json: bool) -> anyhow::Result<i32> {
    print_report(report, json)?;
    Ok(report.exit_code())
}
