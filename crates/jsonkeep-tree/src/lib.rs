//! Mutable JSON value tree for jsonkeep.
//!
//! A [`Node`] is a JSON value whose arrays and objects live behind shared
//! [`Container`] handles. Cloning a container clones the handle, so a child
//! reached through a parent can be mutated in place and the change is visible
//! from the root. This is what lets a store persist nested mutations without
//! asking the caller to hand the whole tree back.
//!
//! # Capabilities
//!
//! Every container kind exposes the same [`MutableTree`] surface:
//! `get`, `set`, `has`, `delete`, `keys`, `entries`, `len` and `push`.
//! Decorators (see `jsonkeep-observe`) implement the same trait on top of a
//! [`Container`].
//!
//! # Design Rules
//!
//! 1. A container never changes kind: an array stays an array.
//! 2. Object keys keep insertion order; the order only matters when encoding.
//! 3. Containers are compared by identity ([`Container::ptr_eq`]), values by
//!    converting to [`serde_json::Value`].
//! 4. A tree that reaches a container from itself cannot be converted to a
//!    value; [`Container::to_value`] reports the cycle instead of recursing.

pub mod container;
pub mod error;
pub mod key;
pub mod node;
pub mod traits;

pub use container::{Container, ContainerId, ContainerKind};
pub use error::{TreeError, TreeResult};
pub use key::Key;
pub use node::Node;
pub use traits::MutableTree;
