use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{TreeError, TreeResult};
use crate::key::Key;
use crate::node::Node;
use crate::traits::MutableTree;

/// Identity of a container, stable for as long as any handle to it is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(usize);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// The two container shapes of a JSON tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Array,
    Object,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Array => f.write_str("array"),
            ContainerKind::Object => f.write_str("object"),
        }
    }
}

enum Body {
    Array(Vec<Node>),
    Object(IndexMap<String, Node>),
}

/// Shared handle to an array or object.
///
/// The contents sit behind an `Arc<RwLock<_>>`, so handles can cross threads
/// and a save running on a background task sees every mutation issued before
/// it started. Locks are only held for the duration of a single operation;
/// no operation locks two containers for writing at once.
#[derive(Clone)]
pub struct Container {
    body: Arc<RwLock<Body>>,
}

impl Container {
    /// A fresh, empty object.
    pub fn object() -> Self {
        Self::from_body(Body::Object(IndexMap::new()))
    }

    /// A fresh, empty array.
    pub fn array() -> Self {
        Self::from_body(Body::Array(Vec::new()))
    }

    /// An object holding the given members, in order.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Node)>) -> Self {
        Self::from_body(Body::Object(entries.into_iter().collect()))
    }

    /// An array holding the given items, in order.
    pub fn from_items(items: impl IntoIterator<Item = Node>) -> Self {
        Self::from_body(Body::Array(items.into_iter().collect()))
    }

    fn from_body(body: Body) -> Self {
        Self {
            body: Arc::new(RwLock::new(body)),
        }
    }

    /// Identity of the underlying container.
    pub fn id(&self) -> ContainerId {
        ContainerId(Arc::as_ptr(&self.body) as *const () as usize)
    }

    /// Returns `true` if both handles address the same container.
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    pub fn kind(&self) -> ContainerKind {
        match &*self.read() {
            Body::Array(_) => ContainerKind::Array,
            Body::Object(_) => ContainerKind::Object,
        }
    }

    pub fn is_array(&self) -> bool {
        self.kind() == ContainerKind::Array
    }

    pub fn is_object(&self) -> bool {
        self.kind() == ContainerKind::Object
    }

    /// Convert to an owned [`Value`] reflecting the contents at call time.
    ///
    /// Fails with [`TreeError::Cycle`] if a container is reachable from
    /// itself. A container shared by two branches is rendered twice.
    pub fn to_value(&self) -> TreeResult<Value> {
        let mut ancestors = Vec::new();
        self.value_with(&mut ancestors)
    }

    pub(crate) fn value_with(&self, ancestors: &mut Vec<ContainerId>) -> TreeResult<Value> {
        let id = self.id();
        // Checked before locking: re-entering a read lock we already hold
        // can deadlock behind a queued writer.
        if ancestors.contains(&id) {
            return Err(TreeError::Cycle(id));
        }
        ancestors.push(id);
        let value = match &*self.read() {
            Body::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.value_with(ancestors))
                    .collect::<TreeResult<_>>()?,
            ),
            Body::Object(members) => {
                let mut map = Map::with_capacity(members.len());
                for (name, member) in members {
                    map.insert(name.clone(), member.value_with(ancestors)?);
                }
                Value::Object(map)
            }
        };
        ancestors.pop();
        Ok(value)
    }

    fn read(&self) -> RwLockReadGuard<'_, Body> {
        self.body.read().expect("tree lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Body> {
        self.body.write().expect("tree lock poisoned")
    }
}

impl MutableTree for Container {
    type Child = Node;

    fn get(&self, key: impl Into<Key>) -> TreeResult<Option<Node>> {
        let key = key.into();
        Ok(match &*self.read() {
            Body::Array(items) => key.as_index().and_then(|i| items.get(i).cloned()),
            Body::Object(members) => members.get(key.as_name().as_ref()).cloned(),
        })
    }

    fn set(&self, key: impl Into<Key>, value: impl Into<Node>) -> TreeResult<Option<Node>> {
        let key = key.into();
        let value = value.into();
        match &mut *self.write() {
            Body::Array(items) => {
                let Some(index) = key.as_index() else {
                    return Err(TreeError::InvalidKey {
                        key,
                        kind: ContainerKind::Array,
                    });
                };
                if index < items.len() {
                    return Ok(Some(std::mem::replace(&mut items[index], value)));
                }
                items.resize(index, Node::Null);
                items.push(value);
                Ok(None)
            }
            Body::Object(members) => Ok(members.insert(key.as_name().into_owned(), value)),
        }
    }

    fn has(&self, key: impl Into<Key>) -> TreeResult<bool> {
        let key = key.into();
        Ok(match &*self.read() {
            Body::Array(items) => key.as_index().is_some_and(|i| i < items.len()),
            Body::Object(members) => members.contains_key(key.as_name().as_ref()),
        })
    }

    fn delete(&self, key: impl Into<Key>) -> TreeResult<Option<Node>> {
        let key = key.into();
        Ok(match &mut *self.write() {
            Body::Array(items) => match key.as_index() {
                Some(index) if index < items.len() => Some(items.remove(index)),
                _ => None,
            },
            Body::Object(members) => members.shift_remove(key.as_name().as_ref()),
        })
    }

    fn keys(&self) -> TreeResult<Vec<Key>> {
        Ok(match &*self.read() {
            Body::Array(items) => (0..items.len()).map(Key::Index).collect(),
            Body::Object(members) => members.keys().map(|name| Key::Name(name.clone())).collect(),
        })
    }

    fn entries(&self) -> TreeResult<Vec<(Key, Node)>> {
        Ok(match &*self.read() {
            Body::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (Key::Index(i), item.clone()))
                .collect(),
            Body::Object(members) => members
                .iter()
                .map(|(name, member)| (Key::Name(name.clone()), member.clone()))
                .collect(),
        })
    }

    fn len(&self) -> TreeResult<usize> {
        Ok(match &*self.read() {
            Body::Array(items) => items.len(),
            Body::Object(members) => members.len(),
        })
    }

    fn push(&self, value: impl Into<Node>) -> TreeResult<usize> {
        match &mut *self.write() {
            Body::Array(items) => {
                items.push(value.into());
                Ok(items.len())
            }
            Body::Object(_) => Err(TreeError::NotAnArray),
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::object()
    }
}

// Contents are not printed: a cyclic tree would recurse forever.
impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, len) = match &*self.read() {
            Body::Array(items) => (ContainerKind::Array, items.len()),
            Body::Object(members) => (ContainerKind::Object, members.len()),
        };
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("kind", &kind)
            .field("len", &len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---- Test 1: Object set get delete ----
    #[test]
    fn object_set_get_delete() {
        let obj = Container::object();
        assert_eq!(obj.set("a", 1).unwrap().map(|n| n.as_i64()), None);
        assert_eq!(obj.get("a").unwrap().and_then(|n| n.as_i64()), Some(1));
        assert!(obj.has("a").unwrap());

        let previous = obj.set("a", 2).unwrap();
        assert_eq!(previous.and_then(|n| n.as_i64()), Some(1));

        let removed = obj.delete("a").unwrap();
        assert_eq!(removed.and_then(|n| n.as_i64()), Some(2));
        assert!(!obj.has("a").unwrap());
        assert!(obj.get("a").unwrap().is_none());
        assert!(obj.delete("a").unwrap().is_none());
    }

    // ---- Test 2: Object keys keep insertion order ----
    #[test]
    fn object_keys_keep_insertion_order() {
        let obj = Container::object();
        obj.set("b", 1).unwrap();
        obj.set("a", 2).unwrap();
        obj.set("c", 3).unwrap();
        obj.set("b", 4).unwrap();
        obj.delete("a").unwrap();
        assert_eq!(obj.keys().unwrap(), vec![Key::from("b"), Key::from("c")]);
        assert_eq!(obj.to_value().unwrap(), json!({"b": 4, "c": 3}));
    }

    // ---- Test 3: Index key addresses object member ----
    #[test]
    fn index_key_addresses_object_member() {
        let obj = Container::object();
        obj.set(3usize, "three").unwrap();
        assert_eq!(obj.get("3").unwrap().unwrap().as_str(), Some("three"));
    }

    // ---- Test 4: Push on object fails ----
    #[test]
    fn push_on_object_fails() {
        let obj = Container::object();
        assert!(matches!(obj.push(1), Err(TreeError::NotAnArray)));
    }

    // ---- Test 5: Array push and index ----
    #[test]
    fn array_push_and_index() {
        let arr = Container::array();
        assert_eq!(arr.push("x").unwrap(), 1);
        assert_eq!(arr.push("y").unwrap(), 2);
        assert_eq!(arr.get(1usize).unwrap().unwrap().as_str(), Some("y"));
        assert_eq!(arr.get("0").unwrap().unwrap().as_str(), Some("x"));
        assert!(arr.get(5usize).unwrap().is_none());
        assert!(arr.get("name").unwrap().is_none());
        assert_eq!(arr.len().unwrap(), 2);
    }

    // ---- Test 6: Array write past end pads with null ----
    #[test]
    fn array_write_past_end_pads_with_null() {
        let arr = Container::array();
        arr.set(2usize, true).unwrap();
        assert_eq!(arr.to_value().unwrap(), json!([null, null, true]));
    }

    // ---- Test 7: Array delete shifts ----
    #[test]
    fn array_delete_shifts() {
        let arr = Container::from_items(vec![Node::from(1), Node::from(2), Node::from(3)]);
        let removed = arr.delete(0usize).unwrap();
        assert_eq!(removed.and_then(|n| n.as_i64()), Some(1));
        assert_eq!(arr.to_value().unwrap(), json!([2, 3]));
        assert!(arr.delete(9usize).unwrap().is_none());
    }

    // ---- Test 8: Array rejects name key ----
    #[test]
    fn array_rejects_name_key() {
        let arr = Container::array();
        let err = arr.set("title", 1).unwrap_err();
        assert!(matches!(
            err,
            TreeError::InvalidKey { kind: ContainerKind::Array, .. }
        ));
    }

    // ---- Test 9: Nested get returns live handle ----
    #[test]
    fn nested_get_returns_live_handle() {
        let root = Container::object();
        root.set("child", Node::object()).unwrap();
        let child = root.get("child").unwrap().unwrap();
        child.as_container().unwrap().set("x", 1).unwrap();
        assert_eq!(root.to_value().unwrap(), json!({"child": {"x": 1}}));

        let again = root.get("child").unwrap().unwrap();
        assert!(again.as_container().unwrap().ptr_eq(child.as_container().unwrap()));
        assert_eq!(
            again.as_container().unwrap().id(),
            child.as_container().unwrap().id()
        );
    }

    // ---- Test 10: Cycle is reported ----
    #[test]
    fn cycle_is_reported() {
        let root = Container::object();
        let inner = Container::array();
        root.set("inner", &inner).unwrap();
        inner.push(&root).unwrap();
        assert!(matches!(root.to_value(), Err(TreeError::Cycle(_))));
        // Break the cycle so the handles can be freed.
        inner.delete(0usize).unwrap();
        assert_eq!(root.to_value().unwrap(), json!({"inner": []}));
    }

    // ---- Test 11: Shared branch is not a cycle ----
    #[test]
    fn shared_branch_is_not_a_cycle() {
        let shared = Container::from_items(vec![Node::from(1)]);
        let root = Container::object();
        root.set("left", &shared).unwrap();
        root.set("right", &shared).unwrap();
        assert_eq!(
            root.to_value().unwrap(),
            json!({"left": [1], "right": [1]})
        );
    }

    // ---- Test 12: Entries pair keys with values ----
    #[test]
    fn entries_pair_keys_with_values() {
        let obj = Container::from_entries(vec![
            ("a".to_string(), Node::from(1)),
            ("b".to_string(), Node::from("two")),
        ]);
        let entries = obj.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, Key::from("a"));
        assert_eq!(entries[1].1.as_str(), Some("two"));
    }

    // ---- Test 13: Debug does not recurse ----
    #[test]
    fn debug_does_not_recurse() {
        let root = Container::object();
        root.set("me", &root).unwrap();
        let rendered = format!("{root:?}");
        assert!(rendered.contains("Object"));
        root.delete("me").unwrap();
    }
}
