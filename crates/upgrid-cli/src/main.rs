//! upgrid — rolling service upgrades.
//!
//! # Usage
//!
//! ```text
//! upgrid service create web-v1 --image registry/web:1 --scale 4 --host h1 --host h2
//! upgrid service create web-v2 --image registry/web:2 --scale 0 --host h1 --host h2
//! upgrid upgrade web-v1 web-v2 --batch-size 2 --interval 2000 --pull
//! upgrid upgrade web-v1 web-v2 --confirm-upgrade
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use upgrid_registry::LocalRegistry;
use upgrid_state::StateStore;

mod commands;
mod config;

use config::UpgridConfig;

#[derive(Parser)]
#[command(
    name = "upgrid",
    about = "upgrid — rolling service upgrades",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./upgrid.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry database file
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll a service over to its replacement in paced batches.
    ///
    /// A finished upgrade waits for `--confirm-upgrade` (retire the old
    /// service) or `--rollback` (move instances back) unless `--cleanup`
    /// is given.
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Manage services in the local registry
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Manage hosts in the local registry
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Show the upgrade record of a service pair, or of every pair
    Status {
        from: Option<String>,
        to: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Register a service and start its instances
    Create {
        name: String,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "1")]
        scale: u32,
        /// Host the service may run on (repeatable)
        #[arg(long = "host")]
        hosts: Vec<String>,
        /// Service this one links to (repeatable)
        #[arg(long = "link")]
        links: Vec<String>,
    },
    /// List registered services
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Delete a service and its instances
    Rm { name: String },
}

#[derive(Subcommand)]
enum HostAction {
    /// Register a host
    Add {
        id: String,
        #[arg(long, default_value = "")]
        address: String,
    },
    /// List registered hosts
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format)?;

    let config = UpgridConfig::load(cli.config.as_deref())?;
    let registry = open_registry(&config.registry_path(cli.registry))?;

    match cli.command {
        Commands::Upgrade(args) => commands::upgrade::run(registry, &config, args).await,
        Commands::Service { action } => match action {
            ServiceAction::Create {
                name,
                image,
                scale,
                hosts,
                links,
            } => commands::service::create(&registry, name, image, scale, hosts, links),
            ServiceAction::List { format } => commands::service::list(&registry, &format),
            ServiceAction::Rm { name } => commands::service::remove(&registry, &name).await,
        },
        Commands::Host { action } => match action {
            HostAction::Add { id, address } => commands::host::add(&registry, &id, &address),
            HostAction::List => commands::host::list(&registry),
        },
        Commands::Status { from, to, format } => {
            commands::status::show(&registry, from.as_deref(), to.as_deref(), &format)
        }
    }
}

/// Install the global subscriber. Logs go to stderr, command output to stdout.
fn init_tracing(verbose: bool, format: LogFormat) -> anyhow::Result<()> {
    let fallback = if verbose { "debug" } else { "info,upgrid=info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn open_registry(path: &Path) -> anyhow::Result<LocalRegistry> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let state = StateStore::open(path)
        .with_context(|| format!("failed to open registry {}", path.display()))?;
    debug!(path = %path.display(), "registry opened");
    Ok(LocalRegistry::new(state))
}
