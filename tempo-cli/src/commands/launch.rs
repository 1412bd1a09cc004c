//! `tempo launch` — start one more instance.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crate::commands::print_json;
use crate::RemoteArgs;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl LaunchArgs {
    pub fn run(self, remote: &RemoteArgs) -> Result<()> {
        let client = remote.client();
        let instance = client
            .launch()
            .with_context(|| format!("launch through {} failed", client.base()))?;

        if self.json {
            return print_json(&instance);
        }
        println!(
            "{} instance {} (#{})",
            "✓".green().bold(),
            instance.id().to_string().bold(),
            instance.seq
        );
        Ok(())
    }
}
