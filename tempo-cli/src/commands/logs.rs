//! `tempo logs` — coordinator event log.

use anyhow::{Context, Result};
use clap::Args;

use crate::RemoteArgs;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show (0 for all).
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

impl LogsArgs {
    pub fn run(self, remote: &RemoteArgs) -> Result<()> {
        let client = remote.client();
        let logs = client
            .logs()
            .with_context(|| format!("failed to fetch logs from {}", client.base()))?;

        for line in tail(&logs, self.lines) {
            println!("{line}");
        }
        Ok(())
    }
}

fn tail(lines: &[String], n: usize) -> &[String] {
    if n == 0 || n >= lines.len() {
        lines
    } else {
        &lines[lines.len() - n..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let lines: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        assert_eq!(tail(&lines, 2), &["4".to_string(), "5".to_string()]);
        assert_eq!(tail(&lines, 0).len(), 5);
        assert_eq!(tail(&lines, 9).len(), 5);
    }
}
