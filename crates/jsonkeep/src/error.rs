use thiserror::Error;

use jsonkeep_gateway::GatewayError;
use jsonkeep_tree::TreeError;

use crate::config::ConfigError;

/// Errors surfaced by a [`Store`](crate::Store).
#[derive(Debug, Error)]
pub enum Error {
    #[error("persistence error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The configured default root is not an object or array, or cannot be
    /// encoded.
    #[error("invalid default value: {0}")]
    InvalidDefault(String),

    /// No tokio runtime was available and a private one could not be started.
    #[error("cannot start save runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// A blocking call would wait for a save that can only progress on the
    /// calling thread's single-threaded runtime.
    #[error("a save is in flight on this thread's runtime; use the async method")]
    WouldBlock,
}

/// Broad classes of [`Error`], for callers that branch on the failure kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backing file is not valid JSON, or its root is not a container.
    Parse,
    /// The tree cannot be encoded.
    Serialization,
    Io,
    /// An operation needed the backing file and it was absent.
    NotFound,
    /// A tree operation or update hook failed.
    Tree,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Gateway(GatewayError::Parse { .. } | GatewayError::NotAContainer(_)) => {
                ErrorKind::Parse
            }
            Error::Gateway(GatewayError::Serialization(_)) => ErrorKind::Serialization,
            Error::Gateway(GatewayError::Io { .. }) | Error::Runtime(_) | Error::WouldBlock => {
                ErrorKind::Io
            }
            Error::Gateway(GatewayError::NotFound(_)) => ErrorKind::NotFound,
            Error::Tree(TreeError::Cycle(_)) => ErrorKind::Serialization,
            Error::Tree(_) => ErrorKind::Tree,
            Error::Config(_) | Error::InvalidDefault(_) => ErrorKind::Config,
        }
    }
}

pub type StoreResult<T> = Result<T, Error>;
