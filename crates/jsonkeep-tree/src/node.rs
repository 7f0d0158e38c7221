use serde_json::{Number, Value};

use crate::container::{Container, ContainerId};
use crate::error::TreeResult;

/// A JSON value whose arrays and objects are shared [`Container`] handles.
///
/// Cloning a `Node::Tree` clones the handle: both clones address the same
/// container, and a mutation through one is visible through the other.
#[derive(Clone, Debug, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Tree(Container),
}

impl Node {
    /// A fresh, empty object.
    pub fn object() -> Self {
        Node::Tree(Container::object())
    }

    /// A fresh, empty array.
    pub fn array() -> Self {
        Node::Tree(Container::array())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Node::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    /// The container behind this node, if it is an array or object.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Node::Tree(container) => Some(container),
            _ => None,
        }
    }

    /// Convert to an owned [`Value`], failing if a container is reachable
    /// from itself.
    pub fn to_value(&self) -> TreeResult<Value> {
        let mut ancestors = Vec::new();
        self.value_with(&mut ancestors)
    }

    pub(crate) fn value_with(&self, ancestors: &mut Vec<ContainerId>) -> TreeResult<Value> {
        Ok(match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Tree(container) => container.value_with(ancestors)?,
        })
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Tree(Container::from_items(
                items.into_iter().map(Node::from),
            )),
            Value::Object(map) => Node::Tree(Container::from_entries(
                map.into_iter().map(|(k, v)| (k, Node::from(v))),
            )),
        }
    }
}

impl From<Container> for Node {
    fn from(container: Container) -> Self {
        Node::Tree(container)
    }
}

impl From<&Container> for Node {
    fn from(container: &Container) -> Self {
        Node::Tree(container.clone())
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::Number(n.into())
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n.into())
    }
}

impl From<u32> for Node {
    fn from(n: u32) -> Self {
        Node::Number(n.into())
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::Number(n.into())
    }
}

impl From<usize> for Node {
    fn from(n: usize) -> Self {
        Node::Number(n.into())
    }
}

/// Non-finite floats have no JSON form and become `null`.
impl From<f64> for Node {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Node::Null, Node::Number)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Node::Null
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or(Node::Null, Into::into)
    }
}
