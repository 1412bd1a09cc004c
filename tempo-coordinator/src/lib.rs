//! Coordinator runtime: launcher gateway, sync engine and HTTP façade.

pub mod api;
pub mod config;
mod error;
pub mod launcher;
pub mod paths;
pub mod protocol;
mod runtime;

pub use config::{CoordinatorConfig, LauncherConfig, ReferenceConfig};
pub use error::{CoordinatorError, LaunchError};
pub use launcher::{
    LauncherFailure, LauncherGateway, LocalProcessLauncher, RemoteLauncher, SshDockerLauncher,
};
pub use protocol::{ApiError, ApiResponse, CoordinatorClient};
pub use runtime::{run, start_blocking, Coordinator};
