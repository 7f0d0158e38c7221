use std::fmt;
use std::sync::Arc;

use jsonkeep_tree::{Key, Node};

/// Structural operations the interception layer reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Has,
    Keys,
    Entries,
    Len,
    Set,
    Delete,
    Push,
    /// The store's root container was swapped for another.
    Replace,
}

impl Operation {
    /// Whether the operation can change the tree and so warrants a save.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Operation::Set | Operation::Delete | Operation::Push | Operation::Replace
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Has => "has",
            Operation::Keys => "keys",
            Operation::Entries => "entries",
            Operation::Len => "len",
            Operation::Set => "set",
            Operation::Delete => "delete",
            Operation::Push => "push",
            Operation::Replace => "replace",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an operation produced.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// `get`: the value read. `set`: the value replaced. `delete`: the value
    /// removed. `replace`: the new root.
    Value(Option<Node>),
    /// `has`.
    Exists(bool),
    /// `keys`.
    Keys(Vec<Key>),
    /// `len`, `entries` (number of pairs) and `push` (new length).
    Count(usize),
}

/// One intercepted operation, as seen by an update hook.
#[derive(Clone, Debug)]
pub struct Update<'a> {
    pub op: Operation,
    /// The addressed key, for operations that take one.
    pub key: Option<&'a Key>,
    pub outcome: Outcome,
}

/// Error type update hooks may return.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Callback fired for every intercepted operation, mutating or not.
pub type UpdateHook = Arc<dyn Fn(&Update<'_>) -> Result<(), HookError> + Send + Sync>;

/// Box a closure as an [`UpdateHook`].
pub fn update_hook<F>(hook: F) -> UpdateHook
where
    F: Fn(&Update<'_>) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(hook)
}
