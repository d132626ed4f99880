use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use changeflow::cli::{Cli, Commands, MemoryCommands, ProfileCommands, TelemetryCommands};
use changeflow::config::{load_profiles, resolve_runtime_config};
use changeflow::doctor::run_doctor;
use changeflow::error::{categorize_error, format_cli_error};
use changeflow::memory::{MemoryStore, run_memory_clear, run_memory_show};
use changeflow::orchestrator::{Orchestrator, run_goal_command, run_plan_command};
use changeflow::profiles::{run_profiles_list, run_profiles_show};
use changeflow::registry::run_manifests_list;
use changeflow::server::run_server;
use changeflow::telemetry::{init_tracing, run_telemetry_report};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;

    match cli.command {
        Commands::Run { goal, json } => {
            let cancel = CancellationToken::new();
            let watcher = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nReceived Ctrl+C, cancelling the remaining steps...");
                    watcher.cancel();
                }
            });
            run_goal_command(&cfg, goal, json, cancel).await?;
        }
        Commands::Plan { goal } => {
            run_plan_command(&cfg, goal).await?;
        }
        Commands::Manifests => {
            let orchestrator = Orchestrator::from_config(&cfg, "manifests", CancellationToken::new())?;
            run_manifests_list(orchestrator.registry())?;
        }
        Commands::Memory { command } => {
            let store = MemoryStore::new(Path::new(&cfg.memory_path));
            match command {
                MemoryCommands::Show { verbose } => run_memory_show(&store, verbose)?,
                MemoryCommands::Clear { force } => run_memory_clear(&store, force)?,
            }
        }
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg)?,
            ProfileCommands::Show => run_profiles_show(&cfg)?,
        },
        Commands::Doctor => {
            run_doctor(&cfg)?;
        }
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => {
                run_telemetry_report(&cfg, path, limit)?;
            }
        },
        Commands::Serve { host, port } => {
            run_server(cfg, host, port).await?;
        }
    }

    Ok(())
}
