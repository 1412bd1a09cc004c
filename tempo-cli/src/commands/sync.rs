//! `tempo sync` — one synchronization round.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tempo_sync::{FailureStage, RoundReport};

use crate::commands::print_json;
use crate::RemoteArgs;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "offset (s)")]
    offset: String,
    #[tabled(rename = "correction (s)")]
    correction: String,
    #[tabled(rename = "status")]
    status: String,
}

impl SyncArgs {
    pub fn run(self, remote: &RemoteArgs) -> Result<()> {
        let client = remote.client();
        let report = client
            .sync_clocks()
            .with_context(|| format!("sync round on {} failed", client.base()))?;

        if self.json {
            return print_json(&report);
        }
        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &RoundReport) {
    println!(
        "Round {} | reference {} | average offset {:+.3}s | {} of {} corrected | {}ms",
        report.round,
        report.reference_time.to_rfc3339(),
        report.average_offset,
        report.applied_count(),
        report.samples.len(),
        report.duration_ms,
    );

    let rows: Vec<SampleRow> = report
        .samples
        .iter()
        .map(|sample| SampleRow {
            instance: sample.instance.to_string(),
            offset: format!("{:+.3}", sample.offset),
            correction: format!("{:+.3}", sample.correction),
            status: if sample.applied {
                "applied".green().to_string()
            } else {
                "sync failed".red().to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for failure in &report.failures {
        let stage = match failure.stage {
            FailureStage::Poll => "poll failed",
            FailureStage::Dispatch => "sync failed",
        };
        println!(
            "{} {} {}: {}",
            "✗".red().bold(),
            failure.instance,
            stage,
            failure.reason
        );
    }
}
