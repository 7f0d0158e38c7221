use std::io;
use std::path::PathBuf;

/// Errors produced by the persistence gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The backing file exists but does not hold valid JSON.
    #[error("malformed JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The backing file holds a JSON scalar where an object or array is required.
    #[error("top-level value in {0} must be an object or array")]
    NotAContainer(PathBuf),

    /// The value cannot be represented as JSON (e.g. it contains a cycle).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The operation needs a backing file and there is none.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// I/O error from a filesystem primitive.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GatewayError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the gateway crate.
pub type GatewayResult<T> = Result<T, GatewayError>;
