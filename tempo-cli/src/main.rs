//! Tempo — fleet registry and logical clock synchronization.
//!
//! # Usage
//!
//! ```text
//! tempo coordinator start [--bind ADDR] [--launch-host HOST] [--ports MIN-MAX] [--auto-sync SECS]
//! tempo coordinator config
//! tempo instance start --port PORT
//! tempo launch [--json]
//! tempo list [--json]
//! tempo sync [--json]
//! tempo logs [--lines N]
//! tempo worldtime
//! ```
//!
//! Client commands talk to `--coordinator` (env `TEMPO_COORDINATOR`).

mod commands;

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{
    coordinator::CoordinatorCommand, instance::InstanceCommand, launch::LaunchArgs,
    list::ListArgs, logs::LogsArgs, sync::SyncArgs, worldtime::WorldtimeArgs,
};
use tempo_coordinator::paths::DEFAULT_COORDINATOR_URL;
use tempo_coordinator::CoordinatorClient;

#[derive(Parser, Debug)]
#[command(
    name = "tempo",
    version,
    about = "Launch a fleet of logical clocks and keep them in agreement",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    remote: RemoteArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where client commands find the coordinator.
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Coordinator base URL.
    #[arg(
        long,
        global = true,
        env = "TEMPO_COORDINATOR",
        default_value = DEFAULT_COORDINATOR_URL
    )]
    pub coordinator: String,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 60)]
    pub timeout: u64,
}

impl RemoteArgs {
    pub fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(self.coordinator.clone(), Duration::from_secs(self.timeout))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or inspect the coordinator.
    Coordinator {
        #[command(subcommand)]
        command: CoordinatorCommand,
    },

    /// Run a worker instance.
    Instance {
        #[command(subcommand)]
        command: InstanceCommand,
    },

    /// Launch one new instance through the coordinator.
    Launch(LaunchArgs),

    /// List registered instances in launch order.
    List(ListArgs),

    /// Run one clock synchronization round.
    Sync(SyncArgs),

    /// Print the coordinator event log.
    Logs(LogsArgs),

    /// Print the reference time the coordinator syncs against.
    Worldtime(WorldtimeArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Coordinator { command } => commands::coordinator::run(command),
        Commands::Instance { command } => commands::instance::run(command),
        Commands::Launch(args) => args.run(&cli.remote),
        Commands::List(args) => args.run(&cli.remote),
        Commands::Sync(args) => args.run(&cli.remote),
        Commands::Logs(args) => args.run(&cli.remote),
        Commands::Worldtime(args) => args.run(&cli.remote),
    }
}
