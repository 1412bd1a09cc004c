//! `tempo instance` — worker process lifecycle.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use tempo_instance::{start_blocking, InstanceConfig};

#[derive(Subcommand, Debug)]
pub enum InstanceCommand {
    /// Serve a logical clock on PORT until ctrl-c.
    Start(StartArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    #[arg(long, env = "PORT")]
    pub port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Upper bound of the random startup skew, seconds.
    #[arg(long, default_value_t = 60)]
    pub max_jitter: u32,

    /// Clock tick period in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub tick_ms: u64,
}

pub fn run(command: InstanceCommand) -> Result<()> {
    match command {
        InstanceCommand::Start(args) => {
            let mut config = InstanceConfig::new(args.port);
            config.bind = args.bind;
            config.max_jitter_secs = args.max_jitter;
            config.tick_interval = Duration::from_millis(args.tick_ms.max(1));
            start_blocking(config)
                .with_context(|| format!("instance on port {} exited with error", args.port))?;
        }
    }
    Ok(())
}
