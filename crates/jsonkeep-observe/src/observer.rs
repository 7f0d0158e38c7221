use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use jsonkeep_tree::{Container, ContainerId, Key, MutableTree, Node, TreeError, TreeResult};

use crate::operation::{Operation, Outcome, Update, UpdateHook};
use crate::scheduler::SaveRequest;

/// Shared context behind every [`ObservedContainer`] of one tree.
///
/// Holds the update hook, the save requester, and the wrapper cache that keeps
/// decorator identity stable: while a decorator is alive, reading the same
/// child container again yields that same [`ObservedContainer`].
pub struct Observer {
    hook: Option<UpdateHook>,
    saver: Option<Arc<dyn SaveRequest>>,
    cache: Option<RwLock<WrapperCache>>,
}

/// Fewest entries the wrapper cache holds before it sweeps dead ones.
const MIN_SWEEP: usize = 64;

/// Weak decorator handles keyed by container identity.
///
/// Entries never keep a decorator (or its container) alive. Dead entries are
/// swept once the map doubles past its last live size.
struct WrapperCache {
    entries: HashMap<ContainerId, Weak<ObservedInner>>,
    sweep_at: usize,
}

impl WrapperCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: MIN_SWEEP,
        }
    }

    fn lookup(&self, id: &ContainerId) -> Option<ObservedContainer> {
        self.entries
            .get(id)
            .and_then(Weak::upgrade)
            .map(|inner| ObservedContainer { inner })
    }

    fn insert(&mut self, id: ContainerId, wrapped: &ObservedContainer) {
        self.entries.insert(id, Arc::downgrade(&wrapped.inner));
        if self.entries.len() >= self.sweep_at {
            self.entries.retain(|_, entry| entry.strong_count() > 0);
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP);
        }
    }

    fn live(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}

impl Observer {
    /// Observer with an identity-stable wrapper cache.
    pub fn new(hook: Option<UpdateHook>, saver: Option<Arc<dyn SaveRequest>>) -> Arc<Self> {
        Arc::new(Self {
            hook,
            saver,
            cache: Some(RwLock::new(WrapperCache::new())),
        })
    }

    /// Observer that builds a fresh decorator on every access.
    pub fn uncached(hook: Option<UpdateHook>, saver: Option<Arc<dyn SaveRequest>>) -> Arc<Self> {
        Arc::new(Self {
            hook,
            saver,
            cache: None,
        })
    }

    /// Observer that reports nothing: decorators forward straight to the
    /// container.
    pub fn inert() -> Arc<Self> {
        Self::uncached(None, None)
    }

    pub fn is_inert(&self) -> bool {
        self.hook.is_none() && self.saver.is_none()
    }

    /// Decorate `container`, reusing the live cached decorator if there is one.
    pub fn wrap(self: &Arc<Self>, container: Container) -> ObservedContainer {
        let Some(cache) = &self.cache else {
            return ObservedContainer::new(container, Arc::clone(self));
        };
        let id = container.id();
        if let Some(hit) = cache.read().expect("wrapper cache poisoned").lookup(&id) {
            return hit;
        }
        let mut cache = cache.write().expect("wrapper cache poisoned");
        if let Some(hit) = cache.lookup(&id) {
            return hit;
        }
        let wrapped = ObservedContainer::new(container, Arc::clone(self));
        cache.insert(id, &wrapped);
        wrapped
    }

    /// Number of cached decorators that are still alive.
    pub fn cached(&self) -> usize {
        self.cache
            .as_ref()
            .map_or(0, |cache| cache.read().expect("wrapper cache poisoned").live())
    }

    /// Forget every cached decorator. Handles already given out stay valid,
    /// but later reads build new decorators.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.write().expect("wrapper cache poisoned");
            cache.entries.clear();
            cache.sweep_at = MIN_SWEEP;
        }
    }

    /// Report an operation that has already been applied.
    ///
    /// Fires the hook (building the outcome only if there is one), then
    /// requests a save for mutating operations. A hook error is returned as
    /// [`TreeError::Hook`] and the save request is skipped; the mutation
    /// itself is not undone.
    pub fn record(
        &self,
        op: Operation,
        key: Option<&Key>,
        outcome: impl FnOnce() -> Outcome,
    ) -> TreeResult<()> {
        if let Some(hook) = &self.hook {
            let update = Update {
                op,
                key,
                outcome: outcome(),
            };
            hook(&update).map_err(|e| TreeError::Hook(e.to_string()))?;
        }
        if op.is_mutating() {
            if let Some(saver) = &self.saver {
                saver.request_save();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("hook", &self.hook.is_some())
            .field("saver", &self.saver.is_some())
            .field("cached", &self.cached())
            .finish()
    }
}

struct ObservedInner {
    container: Container,
    observer: Arc<Observer>,
}

/// A [`Container`] whose operations are reported to an [`Observer`].
#[derive(Clone)]
pub struct ObservedContainer {
    inner: Arc<ObservedInner>,
}

impl ObservedContainer {
    fn new(container: Container, observer: Arc<Observer>) -> Self {
        Self {
            inner: Arc::new(ObservedInner {
                container,
                observer,
            }),
        }
    }

    /// The undecorated container. Operations on it are not reported.
    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    pub fn observer(&self) -> &Arc<Observer> {
        &self.inner.observer
    }

    /// Identity of the underlying container.
    pub fn id(&self) -> ContainerId {
        self.inner.container.id()
    }

    /// Returns `true` if both handles are the same decorator.
    pub fn ptr_eq(&self, other: &ObservedContainer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot the subtree as a [`Value`]. Not reported to the hook.
    pub fn to_value(&self) -> TreeResult<Value> {
        self.inner.container.to_value()
    }

    fn observe(&self, node: Node) -> Observed {
        match node {
            Node::Tree(child) => Observed::Tree(self.inner.observer.wrap(child)),
            scalar => Observed::Value(scalar),
        }
    }
}

impl MutableTree for ObservedContainer {
    type Child = Observed;

    fn get(&self, key: impl Into<Key>) -> TreeResult<Option<Observed>> {
        let key = key.into();
        let found = self.inner.container.get(&key)?;
        self.inner
            .observer
            .record(Operation::Get, Some(&key), || Outcome::Value(found.clone()))?;
        Ok(found.map(|node| self.observe(node)))
    }

    fn set(&self, key: impl Into<Key>, value: impl Into<Node>) -> TreeResult<Option<Node>> {
        let key = key.into();
        let previous = self.inner.container.set(&key, value)?;
        self.inner
            .observer
            .record(Operation::Set, Some(&key), || Outcome::Value(previous.clone()))?;
        Ok(previous)
    }

    fn has(&self, key: impl Into<Key>) -> TreeResult<bool> {
        let key = key.into();
        let exists = self.inner.container.has(&key)?;
        self.inner
            .observer
            .record(Operation::Has, Some(&key), || Outcome::Exists(exists))?;
        Ok(exists)
    }

    fn delete(&self, key: impl Into<Key>) -> TreeResult<Option<Node>> {
        let key = key.into();
        let removed = self.inner.container.delete(&key)?;
        self.inner
            .observer
            .record(Operation::Delete, Some(&key), || Outcome::Value(removed.clone()))?;
        Ok(removed)
    }

    fn keys(&self) -> TreeResult<Vec<Key>> {
        let keys = self.inner.container.keys()?;
        self.inner
            .observer
            .record(Operation::Keys, None, || Outcome::Keys(keys.clone()))?;
        Ok(keys)
    }

    fn entries(&self) -> TreeResult<Vec<(Key, Observed)>> {
        let entries = self.inner.container.entries()?;
        self.inner
            .observer
            .record(Operation::Entries, None, || Outcome::Count(entries.len()))?;
        Ok(entries
            .into_iter()
            .map(|(key, node)| (key, self.observe(node)))
            .collect())
    }

    fn len(&self) -> TreeResult<usize> {
        let len = self.inner.container.len()?;
        self.inner
            .observer
            .record(Operation::Len, None, || Outcome::Count(len))?;
        Ok(len)
    }

    fn push(&self, value: impl Into<Node>) -> TreeResult<usize> {
        let len = self.inner.container.push(value)?;
        self.inner
            .observer
            .record(Operation::Push, None, || Outcome::Count(len))?;
        Ok(len)
    }
}

impl fmt::Debug for ObservedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservedContainer")
            .field(&self.inner.container)
            .finish()
    }
}

impl From<ObservedContainer> for Node {
    fn from(observed: ObservedContainer) -> Self {
        Node::Tree(observed.inner.container.clone())
    }
}

impl From<&ObservedContainer> for Node {
    fn from(observed: &ObservedContainer) -> Self {
        Node::Tree(observed.inner.container.clone())
    }
}

/// A child read through an [`ObservedContainer`].
#[derive(Clone, Debug)]
pub enum Observed {
    /// A scalar (`null`, bool, number or string).
    Value(Node),
    /// A nested container, decorated by the same observer.
    Tree(ObservedContainer),
}

impl Observed {
    pub fn as_tree(&self) -> Option<&ObservedContainer> {
        match self {
            Observed::Tree(tree) => Some(tree),
            Observed::Value(_) => None,
        }
    }

    pub fn into_tree(self) -> Option<ObservedContainer> {
        match self {
            Observed::Tree(tree) => Some(tree),
            Observed::Value(_) => None,
        }
    }

    /// The scalar, if this child is not a container.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Observed::Value(node) => Some(node),
            Observed::Tree(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_node().and_then(Node::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_node().and_then(Node::as_i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_node().and_then(Node::as_bool)
    }

    pub fn to_value(&self) -> TreeResult<Value> {
        match self {
            Observed::Value(node) => node.to_value(),
            Observed::Tree(tree) => tree.to_value(),
        }
    }
}

impl From<Observed> for Node {
    fn from(observed: Observed) -> Self {
        match observed {
            Observed::Value(node) => node,
            Observed::Tree(tree) => tree.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use crate::operation::update_hook;

    #[derive(Default)]
    struct CountingSaver {
        requests: AtomicUsize,
    }

    impl SaveRequest for CountingSaver {
        fn request_save(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    type Log = Arc<Mutex<Vec<(Operation, Option<Key>)>>>;

    fn logging_hook() -> (UpdateHook, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let hook = update_hook(move |update| {
            sink.lock().unwrap().push((update.op, update.key.cloned()));
            Ok(())
        });
        (hook, log)
    }

    fn sets(log: &Log) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == Operation::Set)
            .count()
    }

    #[test]
    fn mutation_is_applied_before_hook_fires() {
        let root = Container::object();
        let seen = Arc::new(Mutex::new(None));
        let watched = root.clone();
        let slot = seen.clone();
        let hook = update_hook(move |_| {
            *slot.lock().unwrap() = Some(watched.to_value().unwrap());
            Ok(())
        });
        let data = Observer::new(Some(hook), None).wrap(root);

        data.set("a", 1).unwrap();
        assert_eq!(seen.lock().unwrap().clone(), Some(json!({"a": 1})));
    }

    #[test]
    fn nested_writes_are_observed() {
        let (hook, log) = logging_hook();
        let saver = Arc::new(CountingSaver::default());
        let data = Observer::new(Some(hook), Some(saver.clone())).wrap(Container::object());

        data.set("a", Node::object()).unwrap();
        let a = data.get("a").unwrap().unwrap().into_tree().unwrap();
        a.set("b", Node::object()).unwrap();
        let b = a.get("b").unwrap().unwrap().into_tree().unwrap();
        b.set("c", 1).unwrap();

        assert_eq!(sets(&log), 3);
        assert_eq!(saver.requests.load(Ordering::SeqCst), 3);
        assert_eq!(data.to_value().unwrap(), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn reads_fire_hook_without_requesting_saves() {
        let (hook, log) = logging_hook();
        let saver = Arc::new(CountingSaver::default());
        let data = Observer::new(Some(hook), Some(saver.clone()))
            .wrap(Container::from_entries(vec![("k".to_string(), Node::from(1))]));

        data.get("k").unwrap();
        data.has("k").unwrap();
        data.keys().unwrap();
        data.entries().unwrap();
        data.len().unwrap();

        let ops: Vec<Operation> = log.lock().unwrap().iter().map(|(op, _)| *op).collect();
        assert_eq!(
            ops,
            vec![
                Operation::Get,
                Operation::Has,
                Operation::Keys,
                Operation::Entries,
                Operation::Len
            ]
        );
        assert_eq!(saver.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_mutating_operation_requests_a_save() {
        let saver = Arc::new(CountingSaver::default());
        let observer = Observer::new(None, Some(saver.clone()));
        let data = observer.wrap(Container::object());

        data.set("list", Node::array()).unwrap();
        let list = data.get("list").unwrap().unwrap().into_tree().unwrap();
        list.push(1).unwrap();
        list.set(0usize, 2).unwrap();
        list.delete(0usize).unwrap();
        data.delete("list").unwrap();
        observer
            .record(Operation::Replace, None, || Outcome::Value(None))
            .unwrap();

        assert_eq!(saver.requests.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn cached_wrappers_are_identity_stable() {
        let observer = Observer::new(None, None);
        let data = observer.wrap(Container::object());
        data.set("child", Node::object()).unwrap();

        let first = data.get("child").unwrap().unwrap().into_tree().unwrap();
        let second = data.get("child").unwrap().unwrap().into_tree().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(observer.cached(), 2);

        observer.clear_cache();
        assert_eq!(observer.cached(), 0);
        let third = data.get("child").unwrap().unwrap().into_tree().unwrap();
        assert!(!first.ptr_eq(&third));
        assert_eq!(first.id(), third.id());
    }

    #[test]
    fn replaced_children_do_not_accumulate_in_cache() {
        let observer = Observer::new(None, None);
        let data = observer.wrap(Container::object());

        for _ in 0..10_000 {
            data.set("session", Node::object()).unwrap();
            data.get("session").unwrap();
        }

        assert_eq!(observer.cached(), 1);
        let cache = observer.cache.as_ref().unwrap().read().unwrap();
        assert!(cache.entries.len() <= MIN_SWEEP);
    }

    #[test]
    fn held_wrappers_survive_sweeps() {
        let observer = Observer::new(None, None);
        let data = observer.wrap(Container::object());
        data.set("kept", Node::object()).unwrap();
        let kept = data.get("kept").unwrap().unwrap().into_tree().unwrap();

        for i in 0..(MIN_SWEEP * 4) {
            data.set("scratch", Node::object()).unwrap();
            data.get("scratch").unwrap();
            data.set(format!("n{i}"), i).unwrap();
        }

        let again = data.get("kept").unwrap().unwrap().into_tree().unwrap();
        assert!(kept.ptr_eq(&again));
        assert_eq!(observer.cached(), 2);

        drop((kept, again));
        assert_eq!(observer.cached(), 1);
    }

    #[test]
    fn uncached_wrappers_share_container_only() {
        let observer = Observer::uncached(None, None);
        let data = observer.wrap(Container::object());
        data.set("child", Node::object()).unwrap();

        let first = data.get("child").unwrap().unwrap().into_tree().unwrap();
        let second = data.get("child").unwrap().unwrap().into_tree().unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(first.container().ptr_eq(second.container()));
        assert_eq!(observer.cached(), 0);
    }

    #[test]
    fn hook_error_propagates_after_mutation() {
        let saver = Arc::new(CountingSaver::default());
        let hook = update_hook(|update| {
            if update.op == Operation::Set {
                return Err("rejected".into());
            }
            Ok(())
        });
        let data = Observer::new(Some(hook), Some(saver.clone())).wrap(Container::object());

        let err = data.set("a", 1).unwrap_err();
        assert!(matches!(err, TreeError::Hook(ref msg) if msg == "rejected"));
        assert_eq!(data.container().get("a").unwrap().unwrap().as_i64(), Some(1));
        assert_eq!(saver.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hook_sees_outcomes() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let hook = update_hook(move |update| {
            sink.lock().unwrap().push(update.outcome.clone());
            Ok(())
        });
        let data = Observer::new(Some(hook), None).wrap(Container::array());

        data.push("x").unwrap();
        data.has(0usize).unwrap();
        data.set(0usize, "y").unwrap();

        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(outcomes[0], Outcome::Count(1)));
        assert!(matches!(outcomes[1], Outcome::Exists(true)));
        match &outcomes[2] {
            Outcome::Value(Some(previous)) => assert_eq!(previous.as_str(), Some("x")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn inert_observer_only_forwards() {
        let observer = Observer::inert();
        assert!(observer.is_inert());
        let data = observer.wrap(Container::object());
        for i in 0..1000usize {
            data.set(format!("k{i}"), i).unwrap();
        }
        assert_eq!(data.container().len().unwrap(), 1000);
        assert_eq!(observer.cached(), 0);
    }

    #[test]
    fn observed_values_convert_back_to_nodes() {
        let data = Observer::inert().wrap(Container::object());
        data.set("name", "ada").unwrap();
        data.set("inner", Node::object()).unwrap();

        let name = data.get("name").unwrap().unwrap();
        assert_eq!(name.as_str(), Some("ada"));
        assert!(name.as_tree().is_none());

        let inner = data.get("inner").unwrap().unwrap();
        data.set("alias", inner).unwrap();
        let alias = data.container().get("alias").unwrap().unwrap();
        let original = data.container().get("inner").unwrap().unwrap();
        assert!(alias
            .as_container()
            .unwrap()
            .ptr_eq(original.as_container().unwrap()));
    }
}
