//! Seams between the engine and the outside world.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tempo_core::Instance;

use crate::error::ClientError;

/// Authoritative time source consulted once per round.
#[async_trait]
pub trait ReferenceClock: Send + Sync {
    async fn now(&self) -> Result<DateTime<Utc>, ClientError>;

    /// Short label for logs, e.g. the URL queried.
    fn describe(&self) -> String;
}

/// Reads and adjusts a remote instance's logical clock.
///
/// `budget` is how long the caller will wait for the answer. Implementations
/// must give up on the underlying I/O by then; work that outlives the budget
/// could land after the caller has reported the call as failed.
#[async_trait]
pub trait InstanceClient: Send + Sync {
    async fn get_time(
        &self,
        instance: &Instance,
        budget: Duration,
    ) -> Result<DateTime<Utc>, ClientError>;

    /// Add `seconds` (signed, fractional) to the instance's clock.
    async fn apply_correction(
        &self,
        instance: &Instance,
        seconds: f64,
        budget: Duration,
    ) -> Result<(), ClientError>;
}
