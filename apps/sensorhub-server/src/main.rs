mod registered_modules;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use hubkit::bootstrap::{self, HostConfig, RunOptions, ShutdownTrigger};
use hubkit::registry::ModuleTypeRegistry;
use hubkit::telemetry;

/// Reserved exit status for fatal bootstrap failures (unreadable config
/// store, corrupt records). Per-module failures never exit the host.
const EXIT_BOOTSTRAP_FAILURE: i32 = 2;

/// SensorHub Server - pluggable module host for sensor deployments
#[derive(Parser)]
#[command(name = "sensorhub-server")]
#[command(about = "SensorHub Server - pluggable module host for sensor deployments")]
#[command(version)]
struct Cli {
    /// Path to host configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Module config store directory (overrides config)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Base data/state directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host
    Run,
    /// Validate configuration, list available module types and exit
    Check,
}

#[tokio::main]
async fn main() {
    let code = match server_main().await {
        Ok(()) => 0,
        Err(error) => {
            // Single diagnostic line, distinct from per-module warnings.
            eprintln!("fatal: {error:#}");
            EXIT_BOOTSTRAP_FAILURE
        }
    };
    std::process::exit(code);
}

async fn server_main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(ref path) = cli.config {
        if !Path::new(path).is_file() {
            anyhow::bail!("config file does not exist: {}", path.display());
        }
    }

    telemetry::init_logging(telemetry::level_for_verbosity(cli.verbose));

    // Layered config: defaults -> YAML (if provided) -> env (SENSORHUB__*)
    // -> CLI overrides.
    let mut config = HostConfig::load(cli.config.as_deref())?;
    if let Some(store_dir) = cli.store_dir {
        config.store_dir = store_dir;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    tracing::info!("SensorHub Server starting");

    let types = ModuleTypeRegistry::discover();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config, types).await,
        Commands::Check => check_config(&config, &types),
    }
}

fn check_config(config: &HostConfig, types: &ModuleTypeRegistry) -> Result<()> {
    println!("Configuration is valid");
    println!("store_dir: {}", config.store_dir.display());
    println!("data_dir:  {}", config.data_dir.display());
    println!("Available module types:");
    for t in types.available() {
        println!("  {:<16} {:<28} {}", t.impl_id, t.type_name, t.config_kind);
    }
    Ok(())
}

async fn run_server(config: HostConfig, types: ModuleTypeRegistry) -> Result<()> {
    bootstrap::run(RunOptions {
        config,
        types,
        shutdown: ShutdownTrigger::Signals,
    })
    .await
}
