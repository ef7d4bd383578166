use pkgward_core::audit::AuditOutcome;
use pkgward_core::installer::InstallOutcome;
use pkgward_core::pipeline::Report;
use pkgward_core::security::RiskVerdict;
use pkgward_core::types::DecisionSource;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// Print a pipeline report. Successes go to stdout, failures to stderr.
pub fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    let line = summary(report);
    if report.is_success() {
        println!("{line}");
    } else {
        eprintln!("error: {line}");
    }
    Ok(())
}

pub fn print_verdict(verdict: &RiskVerdict) {
    println!("{} {}", verdict.package, verdict.version);
    println!("  risk:        {}", verdict.level.as_str().to_uppercase());
    println!("  recommended: {}", verdict.action);
    for f in &verdict.findings {
        println!("    - [{}] {}: {}", f.level, f.rule, f.reason);
    }
    println!("  rationale:   {}", verdict.rationale);
}

fn summary(report: &Report) -> String {
    let env = report.env.as_deref().unwrap_or("-");
    let package = report
        .verdict
        .as_ref()
        .map(|v| format!("{} {}", v.package, v.version))
        .unwrap_or_default();
    let error = report.error.as_deref().unwrap_or("");

    match report.outcome {
        AuditOutcome::Installed => {
            let via = match report.decision.as_ref().map(|d| d.via) {
                Some(DecisionSource::Policy) => "approved by policy",
                _ => "approved by operator",
            };
            let previous = match &report.install {
                Some(InstallOutcome::Installed {
                    previous: Some(p), ..
                }) => format!(", replaced {p}"),
                _ => String::new(),
            };
            format!("installed {package} into '{env}' ({via}{previous})")
        }
        AuditOutcome::AlreadyInstalled => format!("{package} already installed in '{env}'"),
        AuditOutcome::Verified => format!("verified {package}"),
        AuditOutcome::Uninstalled => format!("uninstalled from '{env}'"),
        AuditOutcome::EnvCreated => match &report.environment {
            Some(e) => format!("created environment '{}' ({})", e.id, e.interpreter),
            None => format!("created environment '{env}'"),
        },
        AuditOutcome::EnvRemoved => format!("removed environment '{env}'"),
        AuditOutcome::InstallFailed => {
            let rollback = match &report.install {
                Some(InstallOutcome::Failed {
                    rolled_back: true, ..
                }) => " (environment restored)".to_string(),
                Some(InstallOutcome::Failed {
                    rollback_error: Some(e),
                    ..
                }) => format!(" (rollback failed: {e})"),
                _ => String::new(),
            };
            format!("{error}{rollback}")
        }
        _ => error.to_string(),
    }
}
