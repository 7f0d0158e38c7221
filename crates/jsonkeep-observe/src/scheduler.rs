use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Something the scheduler can write out.
///
/// Both methods must capture the target's state at the moment the write
/// begins; the scheduler never snapshots anything itself.
#[async_trait]
pub trait Persist: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write on the calling thread.
    fn persist_blocking(&self) -> Result<(), Self::Error>;

    /// Write without blocking the calling task.
    async fn persist(&self) -> Result<(), Self::Error>;
}

/// Receiver of "something changed, save eventually" notifications.
pub trait SaveRequest: Send + Sync {
    fn request_save(&self);
}

/// Timing knobs for a [`Scheduler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Quiet period after the last request before a save fires.
    pub auto_save_delay: Duration,
    /// Poll interval while waiting for an in-flight save to finish.
    pub save_retry_delay: Duration,
    /// How many times a pending save may be pushed back before it is forced.
    pub max_coalesced_delays: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            auto_save_delay: Duration::from_millis(750),
            save_retry_delay: Duration::from_millis(100),
            max_coalesced_delays: 10,
        }
    }
}

struct PendingTimer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ScheduleState {
    /// A physical write is in progress.
    saving: bool,
    pending: Option<PendingTimer>,
    /// Times the pending timer was reset without firing.
    coalesce_count: u32,
    generation: u64,
    /// Background saves committed to run that do not hold the guard yet.
    queued: usize,
    closed: bool,
}

/// A background save that has been committed to but not started. Close
/// waits until every ticket is gone; dropping one, including when its task
/// is cancelled, releases it.
struct QueuedSave<P: Persist> {
    scheduler: Weak<Scheduler<P>>,
}

impl<P: Persist> QueuedSave<P> {
    /// The caller holds the scheduler lock that `state` comes from.
    fn register(scheduler: &Weak<Scheduler<P>>, state: &mut ScheduleState) -> Self {
        state.queued += 1;
        Self {
            scheduler: scheduler.clone(),
        }
    }
}

impl<P: Persist> Drop for QueuedSave<P> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            let mut state = scheduler
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.queued = state.queued.saturating_sub(1);
        }
    }
}

/// Debounced, serialized saves for one [`Persist`] target.
///
/// States:
/// - **Idle**: no timer, no write. A request arms a timer.
/// - **Pending**: a timer is armed. A request cancels and re-arms it, unless
///   it has already been pushed back `max_coalesced_delays` times, in which
///   case the save is forced immediately.
/// - **Saving**: a write is in flight. Any other save waits, polling every
///   `save_retry_delay`, until it completes. Completion, successful or not,
///   clears the flag and the coalesce count.
///
/// A timer that has fired, or a forced save, is queued until its task takes
/// the in-flight guard. Closing waits for queued saves as well as the one in
/// flight, so none of them writes after close returns.
///
/// Timers run as tasks on the given tokio runtime. They hold only a weak
/// reference, so dropping the scheduler cancels them. Without a runtime there
/// are no timers and every request saves immediately on the calling thread.
pub struct Scheduler<P: Persist> {
    config: ScheduleConfig,
    target: Arc<P>,
    runtime: Option<Handle>,
    state: Mutex<ScheduleState>,
    last_error: Mutex<Option<P::Error>>,
    writes_completed: AtomicU64,
    writes_failed: AtomicU64,
    me: Weak<Self>,
}

impl<P: Persist> Scheduler<P> {
    pub fn new(target: Arc<P>, config: ScheduleConfig, runtime: Option<Handle>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            target,
            runtime,
            state: Mutex::new(ScheduleState::default()),
            last_error: Mutex::new(None),
            writes_completed: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn target(&self) -> &Arc<P> {
        &self.target
    }

    /// Ask for a debounced save.
    pub fn request(&self) {
        let Some(runtime) = &self.runtime else {
            if self.is_closed() {
                return;
            }
            trace!("no timer runtime; saving immediately");
            if let Err(err) = self.save_now_blocking() {
                self.retain_error(err);
            }
            return;
        };
        let mut state = self.lock();
        if state.closed {
            trace!("scheduler closed; ignoring save request");
            return;
        }
        if let Some(timer) = state.pending.take() {
            timer.task.abort();
            state.coalesce_count += 1;
            if state.coalesce_count >= self.config.max_coalesced_delays {
                debug!(
                    coalesced = state.coalesce_count,
                    "coalesce limit reached; forcing save"
                );
                state.coalesce_count = 0;
                let ticket = QueuedSave::register(&self.me, &mut state);
                drop(state);
                self.spawn_save(runtime, ticket);
                return;
            }
        }
        state.generation += 1;
        let generation = state.generation;
        let task = self.spawn_timer(runtime, generation);
        state.pending = Some(PendingTimer { generation, task });
        trace!(generation, coalesced = state.coalesce_count, "save timer armed");
    }

    /// Save now, waiting for any in-flight save first. Cancels a pending
    /// timer, since this write covers everything it would have.
    pub async fn save_now(&self) -> Result<(), P::Error> {
        self.cancel_pending();
        let _guard = self.acquire().await;
        self.persist_guarded().await
    }

    /// Blocking counterpart of [`save_now`](Self::save_now).
    ///
    /// Waits for an in-flight save by sleeping the calling thread, so it must
    /// not run on a runtime thread that the in-flight save needs.
    pub fn save_now_blocking(&self) -> Result<(), P::Error> {
        self.cancel_pending();
        let _guard = self.acquire_blocking();
        let result = self.target.persist_blocking();
        self.record(result)
    }

    /// Stop accepting requests, wait for any in-flight or already claimed
    /// save, and flush once if a timer was pending. Returns an unread
    /// background error, if any.
    pub async fn close(&self) -> Result<(), P::Error> {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.take()
        };
        let _guard = self.drain().await;
        if let Some(timer) = pending {
            timer.task.abort();
            debug!("flushing pending save on close");
            self.persist_guarded().await?;
        }
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Blocking counterpart of [`close`](Self::close).
    pub fn close_blocking(&self) -> Result<(), P::Error> {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.take()
        };
        if let Some(timer) = &pending {
            timer.task.abort();
        }
        let _guard = self.drain_blocking();
        if pending.is_some() {
            debug!("flushing pending save on close");
            let result = self.target.persist_blocking();
            self.record(result)?;
        }
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run `work` while holding the in-flight guard, so no save overlaps it.
    pub async fn run_exclusive<Fut: Future>(&self, work: Fut) -> Fut::Output {
        let _guard = self.acquire().await;
        work.await
    }

    /// Blocking counterpart of [`run_exclusive`](Self::run_exclusive).
    pub fn run_exclusive_blocking<R>(&self, work: impl FnOnce() -> R) -> R {
        let _guard = self.acquire_blocking();
        work()
    }

    /// Disarm the pending timer, if any, without saving.
    pub fn cancel_pending(&self) {
        if let Some(timer) = self.lock().pending.take() {
            timer.task.abort();
        }
    }

    /// Blocking shutdown for use from `Drop`: stop accepting requests and, if
    /// a timer was pending and nothing is in flight, flush once.
    pub fn shutdown_blocking(&self) -> Result<(), P::Error> {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.take()
        };
        let Some(timer) = pending else {
            return Ok(());
        };
        timer.task.abort();
        let Some(_guard) = self.try_acquire(false) else {
            warn!("save in flight at shutdown; skipping final flush");
            return Ok(());
        };
        let result = self.target.persist_blocking();
        self.record(result)
    }

    pub fn is_saving(&self) -> bool {
        self.lock().saving
    }

    /// No write in flight and no background save waiting to start.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        !state.saving && state.queued == 0
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn coalesce_count(&self) -> u32 {
        self.lock().coalesce_count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Writes that completed successfully.
    pub fn writes_completed(&self) -> u64 {
        self.writes_completed.load(Ordering::Acquire)
    }

    /// Writes that returned an error.
    pub fn writes_failed(&self) -> u64 {
        self.writes_failed.load(Ordering::Acquire)
    }

    /// Take the most recent error from a background save.
    pub fn take_error(&self) -> Option<P::Error> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn spawn_timer(&self, runtime: &Handle, generation: u64) -> JoinHandle<()> {
        let me = self.me.clone();
        let delay = self.config.auto_save_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(scheduler) = me.upgrade() else {
                return;
            };
            if let Some(ticket) = scheduler.claim_timer(generation) {
                scheduler.save_in_background(ticket).await;
            }
        })
    }

    fn spawn_save(&self, runtime: &Handle, ticket: QueuedSave<P>) {
        let me = self.me.clone();
        runtime.spawn(async move {
            if let Some(scheduler) = me.upgrade() {
                scheduler.save_in_background(ticket).await;
            }
        });
    }

    /// Clear the pending timer if it is still the one with this generation,
    /// queueing its save under the same lock.
    fn claim_timer(&self, generation: u64) -> Option<QueuedSave<P>> {
        let mut state = self.lock();
        let current = matches!(&state.pending, Some(timer) if timer.generation == generation);
        if !current {
            return None;
        }
        state.pending = None;
        Some(QueuedSave::register(&self.me, &mut state))
    }

    async fn save_in_background(&self, ticket: QueuedSave<P>) {
        let _guard = self.acquire().await;
        drop(ticket);
        if let Err(err) = self.persist_guarded().await {
            self.retain_error(err);
        }
    }

    fn retain_error(&self, err: P::Error) {
        warn!(error = %err, "background save failed");
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    async fn persist_guarded(&self) -> Result<(), P::Error> {
        let result = self.target.persist().await;
        self.record(result)
    }

    fn record(&self, result: Result<(), P::Error>) -> Result<(), P::Error> {
        match &result {
            Ok(()) => {
                self.writes_completed.fetch_add(1, Ordering::AcqRel);
                debug!("save completed");
            }
            Err(_) => {
                self.writes_failed.fetch_add(1, Ordering::AcqRel);
            }
        }
        result
    }

    async fn acquire(&self) -> SavingGuard<'_, P> {
        self.acquire_polling(false).await
    }

    /// Like [`acquire`](Self::acquire), but also waits out queued saves.
    async fn drain(&self) -> SavingGuard<'_, P> {
        self.acquire_polling(true).await
    }

    async fn acquire_polling(&self, drain: bool) -> SavingGuard<'_, P> {
        loop {
            if let Some(guard) = self.try_acquire(drain) {
                return guard;
            }
            tokio::time::sleep(self.config.save_retry_delay).await;
        }
    }

    fn acquire_blocking(&self) -> SavingGuard<'_, P> {
        self.acquire_sleeping(false)
    }

    fn drain_blocking(&self) -> SavingGuard<'_, P> {
        self.acquire_sleeping(true)
    }

    fn acquire_sleeping(&self, drain: bool) -> SavingGuard<'_, P> {
        loop {
            if let Some(guard) = self.try_acquire(drain) {
                return guard;
            }
            std::thread::sleep(self.config.save_retry_delay);
        }
    }

    /// Take the in-flight guard. With `drain`, also refuse while a queued
    /// background save has yet to take it.
    fn try_acquire(&self, drain: bool) -> Option<SavingGuard<'_, P>> {
        let mut state = self.lock();
        if state.saving {
            trace!("save in flight; retrying later");
            return None;
        }
        if drain && state.queued > 0 {
            trace!(queued = state.queued, "background save queued; retrying later");
            return None;
        }
        state.saving = true;
        Some(SavingGuard { scheduler: self })
    }

    fn lock(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().expect("scheduler lock poisoned")
    }
}

impl<P: Persist> SaveRequest for Scheduler<P> {
    fn request_save(&self) {
        self.request();
    }
}

impl<P: Persist> std::fmt::Debug for Scheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("writes_completed", &self.writes_completed())
            .field("writes_failed", &self.writes_failed())
            .finish()
    }
}

/// Holds the `saving` flag. Dropping it, including on error, panic or task
/// cancellation, returns the scheduler to idle.
struct SavingGuard<'a, P: Persist> {
    scheduler: &'a Scheduler<P>,
}

impl<P: Persist> Drop for SavingGuard<'_, P> {
    fn drop(&mut self) {
        let mut state = self
            .scheduler
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.saving = false;
        state.coalesce_count = 0;
    }
}
