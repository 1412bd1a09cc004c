use anyhow::{Context, Result};
use clap::Args;

use crate::RemoteArgs;

#[derive(Args, Debug)]
pub struct WorldtimeArgs {}

impl WorldtimeArgs {
    pub fn run(self, remote: &RemoteArgs) -> Result<()> {
        let client = remote.client();
        let now = client
            .world_time()
            .with_context(|| format!("failed to fetch world time from {}", client.base()))?;
        println!("{}", now.to_rfc3339());
        Ok(())
    }
}
