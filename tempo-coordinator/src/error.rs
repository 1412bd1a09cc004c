use std::path::PathBuf;

use thiserror::Error;

use tempo_core::RegistryError;

/// Failure of a single launch. Registry state is unchanged after any of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// The external launcher reported failure or did not finish in time.
    #[error("launch on {host}:{port} failed: {reason}")]
    LaunchFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// Port allocation or registration was refused.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Error surface for the coordinator runtime, configuration and protocol.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Coordinator YAML config could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The coordinator answered with `ok: false`.
    #[error("coordinator error [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("coordinator protocol error: {0}")]
    Protocol(String),

    #[error("coordinator is not reachable at {url}")]
    CoordinatorNotRunning { url: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoordinatorError {
    CoordinatorError::Io {
        path: path.into(),
        source,
    }
}
