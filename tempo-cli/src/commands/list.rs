//! `tempo list` — registered instances, launch order.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use crate::commands::print_json;
use crate::RemoteArgs;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "#")]
    seq: u64,
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "registered")]
    registered: String,
}

impl ListArgs {
    pub fn run(self, remote: &RemoteArgs) -> Result<()> {
        let client = remote.client();
        let instances = client
            .instances()
            .with_context(|| format!("failed to list instances from {}", client.base()))?;

        if self.json {
            return print_json(&instances);
        }
        if instances.is_empty() {
            println!("No instances registered. Run `tempo launch` to start one.");
            return Ok(());
        }

        let rows: Vec<InstanceRow> = instances
            .iter()
            .map(|instance| InstanceRow {
                seq: instance.seq,
                instance: instance.id().to_string(),
                registered: instance.registered_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{} instances", instances.len());
        Ok(())
    }
}
