//! Error types for tempo-core.

use thiserror::Error;

use crate::types::{InstanceId, PortRange};

/// All errors that can arise from registry operations.
///
/// Each one aborts only the operation that raised it; registry state is left
/// exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// `(host, port)` is already registered.
    #[error("instance {id} is already registered")]
    DuplicateInstance { id: InstanceId },

    /// The port is held by another registered instance (ports are unique
    /// across the whole registry, not per host).
    #[error("port {port} is already in use by {holder}")]
    PortInUse { port: u16, holder: InstanceId },

    /// The port is held by an in-flight launch.
    #[error("port {port} is reserved by a launch in progress")]
    PortReserved { port: u16 },

    /// Every port in the range is used or reserved.
    #[error("no free port left in range {range}")]
    PortSpaceExhausted { range: PortRange },

    /// `min > max`.
    #[error("invalid port range {range}")]
    InvalidPortRange { range: PortRange },
}
