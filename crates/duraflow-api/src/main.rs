//! duraflow CLI entry point.
//!
//! Binary name: `duraflow`
//!
//! Parses CLI arguments, sets up tracing, opens the execution store and
//! dispatches to the command handler.

mod cli;
mod state;
mod workflows;

use clap::Parser;

use cli::{Cli, Commands};
use duraflow_infra::config::load_engine_config;
use duraflow_infra::filesystem::resolve_data_dir;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,duraflow_core=debug",
        _ => "trace",
    };

    let data_dir = resolve_data_dir();
    let config = load_engine_config(&data_dir).await;
    if let Err(e) = duraflow_observe::tracing_setup::init_tracing(filter, config.enable_otel) {
        eprintln!("Warning: tracing already initialized: {e}");
    }

    let result = run(cli, data_dir, config).await;
    duraflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(
    cli: Cli,
    data_dir: std::path::PathBuf,
    config: duraflow_types::config::EngineConfig,
) -> anyhow::Result<()> {
    let state = AppState::init(data_dir, config).await?;

    match cli.command {
        Commands::Worker => cli::worker::run_worker(&state, cli.json).await?,
        Commands::Tick => cli::worker::run_tick(&state, cli.json).await?,
        Commands::Submit {
            service,
            method,
            args,
            with_context,
        } => {
            cli::execution::submit(&state, &service, &method, &args, with_context, cli.json).await?;
        }
        Commands::SubmitFile { path } => {
            cli::execution::submit_file(&state, &path, cli.json).await?;
        }
        Commands::Cancel { id } => cli::execution::cancel(&state, &id, cli.json).await?,
        Commands::Status { id } => cli::execution::status(&state, &id, cli.json).await?,
        Commands::List { status, limit } => {
            cli::execution::list(&state, status.as_deref(), limit, cli.json).await?;
        }
        Commands::Workflows => cli::execution::workflows(&state, cli.json)?,
    }

    Ok(())
}
