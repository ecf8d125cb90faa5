//! Courier CLI entry point.
//!
//! Binary name: `courier`
//!
//! Parses CLI arguments, initializes tracing, the pause store, and the
//! capability registry, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,courier_core=debug,courier_infra=debug",
        _ => "trace",
    };
    courier_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "courier", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.data_dir.clone(), cli.ephemeral).await?;

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, &state, cli.json).await,
        Commands::Resume(args) => cli::run::handle_resume(args, &state, cli.json).await,
        Commands::Validate { graph } => cli::validate::handle_validate(&graph, &state, cli.json).await,
        Commands::Conversations => cli::inspect::list_conversations(&state, cli.json).await,
        Commands::Execution { id } => cli::inspect::show_execution(&id, &state, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    courier_observe::tracing_setup::shutdown_tracing();
    result
}
