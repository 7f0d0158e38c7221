use crate::container::{ContainerId, ContainerKind};
use crate::key::Key;

/// Errors from value tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A container is reachable from itself, so the tree has no finite encoding.
    #[error("cycle detected: container {0} is reachable from itself")]
    Cycle(ContainerId),

    /// The key cannot address a slot of this container kind.
    #[error("key `{key}` cannot address an {kind}")]
    InvalidKey { key: Key, kind: ContainerKind },

    /// Append was called on an object.
    #[error("push is only supported on arrays")]
    NotAnArray,

    /// A caller-supplied update hook returned an error.
    #[error("update hook failed: {0}")]
    Hook(String),
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
