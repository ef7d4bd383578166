use crate::output::{print_json, print_table};
use anyhow::Context;
use pkgward_core::audit::AuditLog;
use std::path::Path;

pub fn run(root: &Path, limit: usize, json: bool) -> anyhow::Result<i32> {
    let records = AuditLog::new(root)
        .tail(limit)
        .context("failed to read audit log")?;

    if json {
        print_json(&records)?;
        return Ok(super::EXIT_OK);
    }
    if records.is_empty() {
        println!("Audit log is empty.");
        return Ok(super::EXIT_OK);
    }
    let rows = records
        .iter()
        .map(|r| {
            let subject = r
                .request
                .as_ref()
                .map(|q| format!("{} {}", q.package, q.version))
                .or_else(|| r.detail.clone())
                .unwrap_or_default();
            vec![
                r.at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.action.to_string(),
                r.env.clone().unwrap_or_else(|| "-".to_string()),
                r.outcome.to_string(),
                r.verdict
                    .as_ref()
                    .map(|v| v.level.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                subject,
            ]
        })
        .collect();
    print_table(&["TIME", "ACTION", "ENV", "OUTCOME", "RISK", "SUBJECT"], rows);
    Ok(super::EXIT_OK)
}
