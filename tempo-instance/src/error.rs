use thiserror::Error;

/// Error surface for the instance clock and server.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("invalid correction {seconds} s")]
    InvalidCorrection { seconds: f64 },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> InstanceError {
    InstanceError::Io {
        context: context.into(),
        source,
    }
}
