use super::{finish, open_pipeline, parse_kv, pick};
use crate::output::{print_json, print_table};
use anyhow::Context;
use pkgward_core::audit::AuditAction;
use pkgward_core::environment::{Environment, EnvironmentStore};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub fn create(
    root: &Path,
    name: &str,
    python: Option<String>,
    extra: &[String],
    json: bool,
) -> anyhow::Result<i32> {
    let pipeline = open_pipeline(root, json)?;
    let report = match parse_kv(extra, &["python_version", "python"]) {
        Ok(mut kv) => {
            let python = pick(python, &mut kv, "python_version").or_else(|| kv.remove("python"));
            pipeline.create_env(name, python.as_deref())
        }
        Err(e) => pipeline.reject_invalid(AuditAction::CreateEnv, Some(name), &e),
    }
    .with_context(|| format!("failed to record creation of '{name}'"))?;
    finish(&report, json)
}

pub fn remove(root: &Path, name: &str, json: bool) -> anyhow::Result<i32> {
    let pipeline = open_pipeline(root, json)?;
    let report = pipeline
        .remove_env(name)
        .with_context(|| format!("failed to record removal of '{name}'"))?;
    finish(&report, json)
}

pub fn list(root: &Path, json: bool) -> anyhow::Result<i32> {
    let envs = EnvironmentStore::new(root)
        .list()
        .context("failed to list environments")?;

    if json {
        print_json(&envs)?;
        return Ok(super::EXIT_OK);
    }
    if envs.is_empty() {
        println!("No environments. Create one with: pkgward create-env <name>");
        return Ok(super::EXIT_OK);
    }
    let rows = envs
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.interpreter.clone(),
                e.packages.len().to_string(),
                e.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["NAME", "PYTHON", "PACKAGES", "UPDATED"], rows);
    Ok(super::EXIT_OK)
}

#[derive(Serialize)]
struct EnvDetails<'a> {
    #[serde(flatten)]
    env: &'a Environment,
    size_bytes: u64,
    python_executable: Option<PathBuf>,
    pip_executable: Option<PathBuf>,
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

pub fn info(root: &Path, name: &str, json: bool) -> anyhow::Result<i32> {
    let env = EnvironmentStore::new(root)
        .get(name)
        .with_context(|| format!("failed to load environment '{name}'"))?;
    let details = EnvDetails {
        size_bytes: env
            .disk_usage()
            .with_context(|| format!("failed to measure environment '{name}'"))?,
        python_executable: existing(env.executable("python")),
        pip_executable: existing(env.executable("pip")),
        env: &env,
    };

    if json {
        print_json(&details)?;
        return Ok(super::EXIT_OK);
    }
    let show = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!("Environment: {}", env.id);
    println!("Path:        {}", env.path.display());
    println!("Python:      {}", env.interpreter);
    println!("Executable:  {}", show(&details.python_executable));
    println!("Pip:         {}", show(&details.pip_executable));
    println!("Size:        {}", human_size(details.size_bytes));
    println!("Created:     {}", env.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated:     {}", env.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Packages:    {}", env.packages.len());
    for (name, version) in &env.packages {
        println!("  {name}=={version}");
    }
    Ok(super::EXIT_OK)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
