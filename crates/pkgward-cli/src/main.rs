use clap::{Parser, Subcommand};
use pkgward_cli::cmd::{self, config::ConfigSubcommand, install::InstallArgs};
use pkgward_cli::{exit_code_for, root};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pkgward",
    about = "Approval-gated Python package installer with risk evaluation and an audit trail",
    version
)]
struct Cli {
    /// Project root (default: auto-detect from .pkgward/)
    #[arg(long, global = true, env = "PKGWARD_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize pkgward in the current project
    Init,

    /// Create an isolated environment
    CreateEnv {
        name: String,
        /// Python version or interpreter (e.g. 3.11)
        #[arg(long)]
        python: Option<String>,
        /// `python_version=<ver>` form
        #[arg(value_name = "KEY=VALUE")]
        extra: Vec<String>,
    },

    /// Remove an environment and everything installed in it
    RemoveEnv { name: String },

    /// List environments
    ListEnvs,

    /// Show one environment
    EnvInfo { name: String },

    /// Evaluate, approve and install a package
    InstallPackage {
        name: String,
        #[arg(long)]
        version: Option<String>,
        /// Target environment (default: installer.default_env)
        #[arg(long)]
        env: Option<String>,
        /// Create the environment if it does not exist
        #[arg(long)]
        create_env: bool,
        /// Reinstall even if the version is already present
        #[arg(long)]
        force: bool,
        /// `version=<v>` / `env=<name>` forms
        #[arg(value_name = "KEY=VALUE")]
        extra: Vec<String>,
    },

    /// Remove a package from an environment
    UninstallPackage {
        name: String,
        #[arg(long)]
        env: Option<String>,
    },

    /// List packages installed in an environment
    ListPackages {
        #[arg(long)]
        env: Option<String>,
    },

    /// Show the risk verdict for a package without installing it
    VerifyPackage {
        name: String,
        #[arg(long)]
        version: Option<String>,
        /// Environment the check is recorded against
        #[arg(long)]
        env: Option<String>,
    },

    /// Show recent audit records
    Audit {
        /// Number of records to show (0 = all)
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // clap's own usage status (2) would collide with "install failed".
            std::process::exit(if e.use_stderr() { cmd::EXIT_INVALID } else { cmd::EXIT_OK });
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::CreateEnv {
            name,
            python,
            extra,
        } => cmd::env::create(&root, &name, python, &extra, json),
        Commands::RemoveEnv { name } => cmd::env::remove(&root, &name, json),
        Commands::ListEnvs => cmd::env::list(&root, json),
        Commands::EnvInfo { name } => cmd::env::info(&root, &name, json),
        Commands::InstallPackage {
            name,
            version,
            env,
            create_env,
            force,
            extra,
        } => cmd::install::install(
            &root,
            InstallArgs {
                package: name,
                version,
                env,
                create_env,
                force,
                extra,
            },
            json,
        ),
        Commands::UninstallPackage { name, env } => cmd::install::uninstall(&root, &name, env, json),
        Commands::ListPackages { env } => cmd::packages::list(&root, env, json),
        Commands::VerifyPackage { name, version, env } => {
            cmd::verify::run(&root, &name, version, env, json)
        }
        Commands::Audit { limit } => cmd::audit::run(&root, limit, json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, json),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(exit_code_for(&e));
        }
    }
}
