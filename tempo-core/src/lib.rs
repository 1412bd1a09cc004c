//! Tempo core library — fleet domain types, the instance registry, errors and
//! the shared event log.
//!
//! - [`types`] — [`Instance`], [`InstanceId`], [`PortRange`]
//! - [`error`] — [`RegistryError`]
//! - [`registry`] — [`InstanceRegistry`] and port reservations
//! - [`events`] — bounded [`EventLog`] with broadcast fan-out

pub mod error;
pub mod events;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use events::EventLog;
pub use registry::{InstanceRegistry, PortReservation};
pub use types::{Instance, InstanceId, PortRange};
