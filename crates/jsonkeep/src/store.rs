use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tracing::{debug, info, warn};

use jsonkeep_gateway::{AsyncFilesystem, Filesystem, Gateway, GatewayError, LocalFs};
use jsonkeep_observe::{
    update_hook, HookError, ObservedContainer, Observer, Operation, Outcome, Persist, SaveRequest,
    Scheduler, Update, UpdateHook,
};
use jsonkeep_tree::{Container, Node};

use crate::config::StoreConfig;
use crate::error::{Error, StoreResult};

/// The backing file and the current root: everything a save needs.
pub(crate) struct StoreCore<F> {
    gateway: Gateway<F>,
    root: RwLock<Container>,
}

impl<F> StoreCore<F> {
    fn root(&self) -> Container {
        self.root.read().expect("store root lock poisoned").clone()
    }

    fn set_root(&self, root: Container) {
        *self.root.write().expect("store root lock poisoned") = root;
    }
}

#[async_trait]
impl<F: Filesystem + AsyncFilesystem> Persist for StoreCore<F> {
    type Error = GatewayError;

    fn persist_blocking(&self) -> Result<(), GatewayError> {
        let root = self.root();
        self.gateway.save(&root)
    }

    async fn persist(&self) -> Result<(), GatewayError> {
        let root = self.root();
        self.gateway.save_async(&root).await
    }
}

/// A runtime the store started itself because the caller had none.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// A JSON document on disk, kept in memory as a shared value tree.
///
/// Read and write through [`data`](Self::data). In the default mode every
/// mutation fires the update hook and schedules a debounced save; see
/// [`StoreConfig`] for direct and manual modes.
///
/// Dropping a store stops its scheduler and, if a save was pending and no
/// write is in flight, flushes once on the dropping thread. Call
/// [`close`](Self::close) to flush unconditionally and see the result.
pub struct Store<F: Filesystem + AsyncFilesystem = LocalFs> {
    core: Arc<StoreCore<F>>,
    scheduler: Arc<Scheduler<StoreCore<F>>>,
    observer: Arc<Observer>,
    config: StoreConfig,
    default: Value,
    _runtime: OwnedRuntime,
}

impl Store<LocalFs> {
    /// Open `path` with default settings. An absent file starts as `{}`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        StoreBuilder::new(path).open()
    }

    pub async fn open_async(path: impl Into<PathBuf>) -> StoreResult<Self> {
        StoreBuilder::new(path).open_async().await
    }

    pub fn builder(path: impl Into<PathBuf>) -> StoreBuilder<LocalFs> {
        StoreBuilder::new(path)
    }
}

impl<F: Filesystem + AsyncFilesystem> Store<F> {
    pub fn path(&self) -> &Path {
        self.core.gateway.path()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The root, decorated so that reads and writes are observed.
    ///
    /// In direct mode the decorator is inert and only forwards.
    pub fn data(&self) -> ObservedContainer {
        self.observer.wrap(self.core.root())
    }

    /// The root without any decoration. Writes through it are never observed
    /// or scheduled.
    pub fn root(&self) -> Container {
        self.core.root()
    }

    /// Swap in a new root and return it decorated.
    ///
    /// Counts as a mutation: the hook sees [`Operation::Replace`] and a save
    /// is scheduled.
    pub fn replace(&self, root: Container) -> StoreResult<ObservedContainer> {
        self.install(root.clone());
        self.observer.record(Operation::Replace, None, || {
            Outcome::Value(Some(Node::Tree(root.clone())))
        })?;
        Ok(self.data())
    }

    /// Save the root.
    ///
    /// With `force`, in direct mode, or with auto-save off, writes now on the
    /// calling thread, waiting for any in-flight save first. Otherwise
    /// requests a debounced save and returns at once.
    ///
    /// Waiting for an in-flight async save blocks the thread, so call
    /// [`save_async`](Self::save_async) from inside a runtime. On a
    /// current-thread runtime that wait could never end, and the call fails
    /// with [`Error::WouldBlock`] instead.
    pub fn save(&self, force: bool) -> StoreResult<()> {
        if force || !self.config.autosaves() {
            self.refuse_to_block(self.scheduler.is_saving())?;
            self.scheduler.save_now_blocking()?;
        } else {
            self.scheduler.request();
        }
        Ok(())
    }

    pub async fn save_async(&self, force: bool) -> StoreResult<()> {
        if force || !self.config.autosaves() {
            self.scheduler.save_now().await?;
        } else {
            self.scheduler.request();
        }
        Ok(())
    }

    /// Remove the backing file. The in-memory root is kept; a later save
    /// writes it out again.
    ///
    /// Any pending save is cancelled so it cannot recreate the file. Fails
    /// with [`Error::WouldBlock`] under the same condition as
    /// [`save`](Self::save).
    pub fn delete(&self) -> StoreResult<()> {
        self.refuse_to_block(self.scheduler.is_saving())?;
        self.scheduler.cancel_pending();
        self.scheduler
            .run_exclusive_blocking(|| self.core.gateway.delete())?;
        info!(path = %self.path().display(), "backing file deleted");
        Ok(())
    }

    pub async fn delete_async(&self) -> StoreResult<()> {
        self.scheduler.cancel_pending();
        self.scheduler
            .run_exclusive(self.core.gateway.delete_async())
            .await?;
        info!(path = %self.path().display(), "backing file deleted");
        Ok(())
    }

    /// Re-read the backing file, discarding unsaved changes. An absent file
    /// resets the root to the default value.
    pub fn reload(&self) -> StoreResult<()> {
        self.scheduler.cancel_pending();
        let root = match self.core.gateway.load()? {
            Some(root) => root,
            None => fresh_root(&self.default),
        };
        self.install(root);
        Ok(())
    }

    pub async fn reload_async(&self) -> StoreResult<()> {
        self.scheduler.cancel_pending();
        let root = match self.core.gateway.load_async().await? {
            Some(root) => root,
            None => fresh_root(&self.default),
        };
        self.install(root);
        Ok(())
    }

    /// Flush a pending save, wait for any in-flight one, and release the
    /// store. Returns the first error among the final save and any unread
    /// background failure.
    pub async fn close(self) -> StoreResult<()> {
        let result = self.scheduler.close().await;
        self.observer.clear_cache();
        info!(path = %self.path().display(), "store closed");
        result.map_err(Error::from)
    }

    /// Blocking counterpart of [`close`](Self::close).
    ///
    /// On a current-thread runtime with a save in flight or queued, fails
    /// with [`Error::WouldBlock`]; the store is then dropped as usual.
    pub fn close_blocking(self) -> StoreResult<()> {
        self.refuse_to_block(!self.scheduler.is_idle())?;
        let result = self.scheduler.close_blocking();
        self.observer.clear_cache();
        info!(path = %self.path().display(), "store closed");
        result.map_err(Error::from)
    }

    /// Take the most recent error from a debounced save, if one failed since
    /// the last call.
    pub fn take_background_error(&self) -> Option<Error> {
        self.scheduler.take_error().map(Error::from)
    }

    /// Physical writes that completed successfully.
    pub fn writes_completed(&self) -> u64 {
        self.scheduler.writes_completed()
    }

    pub fn has_pending_save(&self) -> bool {
        self.scheduler.has_pending()
    }

    /// Error out instead of sleeping the only thread of a current-thread
    /// runtime while it owes us a save.
    fn refuse_to_block(&self, busy: bool) -> StoreResult<()> {
        let single_threaded = Handle::try_current()
            .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::CurrentThread);
        if busy && single_threaded {
            warn!(path = %self.path().display(), "blocking call refused on current-thread runtime");
            return Err(Error::WouldBlock);
        }
        Ok(())
    }

    fn install(&self, root: Container) {
        self.core.set_root(root);
        self.observer.clear_cache();
        debug!(path = %self.path().display(), "root replaced");
    }
}

impl<F: Filesystem + AsyncFilesystem> Drop for Store<F> {
    fn drop(&mut self) {
        if let Err(err) = self.scheduler.shutdown_blocking() {
            warn!(error = %err, path = %self.path().display(), "final save failed");
        }
        self.observer.clear_cache();
    }
}

impl<F: Filesystem + AsyncFilesystem> fmt::Debug for Store<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("config", &self.config)
            .field("writes_completed", &self.writes_completed())
            .finish()
    }
}

/// Configures and opens a [`Store`].
pub struct StoreBuilder<F = LocalFs> {
    path: PathBuf,
    fs: Arc<F>,
    default: Option<Node>,
    config: StoreConfig,
    hook: Option<UpdateHook>,
    runtime: Option<Handle>,
}

impl StoreBuilder<LocalFs> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fs: Arc::new(LocalFs),
            default: None,
            config: StoreConfig::default(),
            hook: None,
            runtime: None,
        }
    }
}

impl<F: Filesystem + AsyncFilesystem> StoreBuilder<F> {
    /// Root to start from when the backing file is absent. Must be an object
    /// or array. Each reload of an absent file starts from a fresh copy.
    pub fn default_value(mut self, value: impl Into<Node>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Callback fired after every operation on [`Store::data`]. Ignored in
    /// direct mode.
    pub fn on_update<H>(mut self, hook: H) -> Self
    where
        H: Fn(&Update<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hook = Some(update_hook(hook));
        self
    }

    /// Runtime for save timers. Defaults to the runtime current at open time,
    /// or a private one if there is none and auto-save is on.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Use other filesystem primitives than the local disk.
    pub fn filesystem<G: Filesystem + AsyncFilesystem>(self, fs: Arc<G>) -> StoreBuilder<G> {
        StoreBuilder {
            path: self.path,
            fs,
            default: self.default,
            config: self.config,
            hook: self.hook,
            runtime: self.runtime,
        }
    }

    /// Load the backing file, or start from the default value if it is absent.
    pub fn open(self) -> StoreResult<Store<F>> {
        let default = self.default_snapshot()?;
        let gateway = self.gateway();
        let root = match gateway.load()? {
            Some(root) => root,
            None => fresh_root(&default),
        };
        self.assemble(gateway, root, default)
    }

    pub async fn open_async(self) -> StoreResult<Store<F>> {
        let default = self.default_snapshot()?;
        let gateway = self.gateway();
        let root = match gateway.load_async().await? {
            Some(root) => root,
            None => fresh_root(&default),
        };
        self.assemble(gateway, root, default)
    }

    fn gateway(&self) -> Gateway<F> {
        Gateway::with_fs(self.path.clone(), Arc::clone(&self.fs), self.config.gateway())
    }

    fn default_snapshot(&self) -> StoreResult<Value> {
        match &self.default {
            None => Ok(Value::Object(serde_json::Map::new())),
            Some(Node::Tree(root)) => root
                .to_value()
                .map_err(|e| Error::InvalidDefault(e.to_string())),
            Some(_) => Err(Error::InvalidDefault(
                "root must be an object or array".into(),
            )),
        }
    }

    fn assemble(self, gateway: Gateway<F>, root: Container, default: Value) -> StoreResult<Store<F>> {
        let autosaves = self.config.autosaves();
        let (handle, runtime) = resolve_runtime(self.runtime, autosaves)?;
        let core = Arc::new(StoreCore {
            gateway,
            root: RwLock::new(root),
        });
        let scheduler = Scheduler::new(Arc::clone(&core), self.config.schedule(), handle);
        let observer = if self.config.direct_mode {
            if self.hook.is_some() {
                debug!("direct mode: update hook ignored");
            }
            Observer::inert()
        } else {
            let saver = autosaves.then(|| Arc::clone(&scheduler) as Arc<dyn SaveRequest>);
            Observer::new(self.hook, saver)
        };
        info!(
            path = %self.path.display(),
            direct = self.config.direct_mode,
            auto_save = self.config.auto_save,
            "store opened"
        );
        Ok(Store {
            core,
            scheduler,
            observer,
            config: self.config,
            default,
            _runtime: runtime,
        })
    }
}

/// Pick the runtime save timers run on. A private runtime is only started
/// when timers are needed and the caller has no runtime of their own.
fn resolve_runtime(
    explicit: Option<Handle>,
    needs_timers: bool,
) -> StoreResult<(Option<Handle>, OwnedRuntime)> {
    if let Some(handle) = explicit.or_else(|| Handle::try_current().ok()) {
        return Ok((Some(handle), OwnedRuntime(None)));
    }
    if !needs_timers {
        return Ok((None, OwnedRuntime(None)));
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("jsonkeep-save")
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;
    debug!("started private save runtime");
    Ok((Some(runtime.handle().clone()), OwnedRuntime(Some(runtime))))
}

fn fresh_root(default: &Value) -> Container {
    match Node::from(default.clone()) {
        Node::Tree(root) => root,
        _ => Container::object(),
    }
}
