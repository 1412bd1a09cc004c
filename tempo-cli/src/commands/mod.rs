pub mod coordinator;
pub mod instance;
pub mod launch;
pub mod list;
pub mod logs;
pub mod sync;
pub mod worldtime;

use anyhow::{Context, Result};
use serde::Serialize;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
