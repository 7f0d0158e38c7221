use crate::error::TreeResult;
use crate::key::Key;
use crate::node::Node;

/// Structural operations shared by every container and container decorator.
///
/// Implementations must satisfy these invariants:
/// - Every call is applied to the underlying container exactly once, whether
///   or not a decorator observes it.
/// - `get` and `entries` return handles, not copies: mutating a returned child
///   container mutates the tree it was read from.
/// - Reads never fail on a missing key; they return `None` or `false`.
pub trait MutableTree {
    /// What `get` and `entries` hand back for a slot.
    type Child;

    /// Read a slot. Returns `Ok(None)` if the key is absent.
    fn get(&self, key: impl Into<Key>) -> TreeResult<Option<Self::Child>>;

    /// Write a slot and return the value it replaced, if any.
    ///
    /// Writing past the end of an array pads the gap with `null`.
    fn set(&self, key: impl Into<Key>, value: impl Into<Node>) -> TreeResult<Option<Node>>;

    /// Check whether a slot exists.
    fn has(&self, key: impl Into<Key>) -> TreeResult<bool>;

    /// Remove a slot and return its value. Array slots after it shift down.
    fn delete(&self, key: impl Into<Key>) -> TreeResult<Option<Node>>;

    /// Keys in order: positions for arrays, member names for objects.
    fn keys(&self) -> TreeResult<Vec<Key>>;

    /// Key/child pairs in key order.
    fn entries(&self) -> TreeResult<Vec<(Key, Self::Child)>>;

    /// Number of slots.
    fn len(&self) -> TreeResult<usize>;

    fn is_empty(&self) -> TreeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Append to an array and return its new length.
    fn push(&self, value: impl Into<Node>) -> TreeResult<usize>;
}
