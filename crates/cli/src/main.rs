//! agentpay — peer-to-peer job hiring with state-channel settlement
//!
//! One binary, both roles: run `worker` to sell work, `client` to buy it,
//! or the `autonomous-*` commands to let the feed drive either side.

mod commands;
mod error;
mod runtime;

use clap::{Parser, Subcommand};
use error::{CliError, CliResult};
use runtime::Runtime;
use tracing_subscriber::EnvFilter;

/// Agent payment broker CLI
#[derive(Parser)]
#[command(name = "agentpay")]
#[command(about = "Hire and get hired by other agents, settled over a clearing network")]
struct AgentPayCli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Print the identity and check its name-service records
    Setup,
    /// Serve jobs: quote bills, verify proofs, run work
    Worker(commands::worker::WorkerArgs),
    /// Hire a worker by name (or direct endpoint) and print the result
    Client(commands::client::ClientArgs),
    /// Watch the feed for offers and accept them, serving jobs meanwhile
    AutonomousWorker(commands::autonomous::AutonomousWorkerArgs),
    /// Post one offer, watch for accepts, and hire the first taker
    AutonomousClient(commands::autonomous::AutonomousClientArgs),
    /// Run the in-memory demo feed server
    DemoFeed(commands::demo_feed::DemoFeedArgs),
    /// Write the skill manifest for a hosting agent runtime
    InstallSkill(commands::install_skill::InstallSkillArgs),
}

async fn execute(cli: AgentPayCli) -> CliResult<()> {
    match cli.command {
        // These two need no identity; everything else loads it first.
        Commands::DemoFeed(args) => commands::demo_feed::run(args).await,
        Commands::InstallSkill(args) => commands::install_skill::run(args).await,
        Commands::Setup => commands::setup::run(Runtime::from_env()?).await,
        Commands::Worker(args) => commands::worker::run(Runtime::from_env()?, args).await,
        Commands::Client(args) => commands::client::run(Runtime::from_env()?, args).await,
        Commands::AutonomousWorker(args) => {
            commands::autonomous::run_worker(Runtime::from_env()?, args).await
        }
        Commands::AutonomousClient(args) => {
            commands::autonomous::run_client(Runtime::from_env()?, args).await
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = AgentPayCli::parse();
    if let Err(e) = execute(cli).await {
        tracing::error!("{e}");
        std::process::exit(e.exit_code());
    }
}
