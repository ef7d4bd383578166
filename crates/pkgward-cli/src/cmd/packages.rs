use crate::output::{print_json, print_table};
use anyhow::Context;
use pkgward_core::{config::Config, environment::EnvironmentStore};
use std::path::Path;

pub fn list(root: &Path, env: Option<String>, json: bool) -> anyhow::Result<i32> {
    let env = match env {
        Some(e) => e,
        None => {
            Config::load_or_default(root)
                .context("failed to load config")?
                .installer
                .default_env
        }
    };
    let environment = EnvironmentStore::new(root)
        .get(&env)
        .with_context(|| format!("failed to load environment '{env}'"))?;

    if json {
        print_json(&environment.packages)?;
        return Ok(super::EXIT_OK);
    }
    if environment.packages.is_empty() {
        println!("No packages installed in '{env}'.");
        return Ok(super::EXIT_OK);
    }
    let rows = environment
        .packages
        .iter()
        .map(|(name, version)| vec![name.clone(), version.clone()])
        .collect();
    print_table(&["PACKAGE", "VERSION"], rows);
    Ok(super::EXIT_OK)
}
