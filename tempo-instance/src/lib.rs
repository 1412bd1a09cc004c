//! Worker instance: a logical clock served over HTTP.

pub mod clock;
mod error;
pub mod server;

pub use clock::{ClockStats, LogicalClock};
pub use error::InstanceError;
pub use server::{router, run, start_blocking, InstanceConfig, InstanceState};
