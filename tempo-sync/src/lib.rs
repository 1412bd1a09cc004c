//! # tempo-sync
//!
//! Clock synchronization engine.
//!
//! [`SyncEngine::run_round`] fetches a reference time, polls every registered
//! instance, and sends each one the correction that moves it to the fleet's
//! average offset. The outside world is reached through [`ReferenceClock`]
//! and [`InstanceClient`]; [`http`] holds the HTTP/JSON implementations.

pub mod client;
pub mod engine;
pub mod error;
pub mod http;
pub mod offsets;
pub mod report;

pub use client::{InstanceClient, ReferenceClock};
pub use engine::{EngineConfig, SyncEngine};
pub use error::{ClientError, SyncError};
pub use report::{FailureStage, InstanceSample, RoundFailure, RoundReport};
