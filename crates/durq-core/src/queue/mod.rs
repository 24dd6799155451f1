//! Queue engine: one instance's persisted queue, its processing loop, and the
//! heartbeat/reclaim protocol it runs against peers sharing the same name.
//!
//! Every entry point (public call, timer, completion) takes the instance's
//! reentrant turn lock, so a processor may complete synchronously from inside
//! a dispatch while completions from other threads wait their turn.

mod builder;
mod processor;
mod reclaim;
mod retry;
mod state;


pub use builder::QueueBuilder;
pub use processor::{Done, Processor};
pub use reclaim::{merge_entries, read_liveness};
pub use retry::{QuadraticBackoff, RetryIf, RetryPolicy};
pub use state::EngineState;

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, error, info, warn};

use crate::config::QueueOptions;
use crate::domain::{
    ClaimId, InProgressEntry, InProgressMap, InstanceId, Liveness, QueueEntry, QueueEvent,
    sort_by_time,
};
use crate::error::ProcessError;
use crate::observability::QueueCounts;
use crate::ports::clock::duration_millis;
use crate::ports::{Clock, EventSink, IdGenerator, StorageBackend, Timestamp, UlidGenerator};
use crate::schedule::{LatePolicy, Scheduler, TaskHandle};
use crate::store::{Field, NamespacedStore, enumerate_instances};

/// Anything that can sit in a queue: persisted as JSON and handed across threads.
pub trait Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Item for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A durable queue instance.
///
/// # 使用例
/// ```ignore
/// let queue = Queue::builder("jobs", |item: Job, done: Done<Job>| {
///     done.success();
/// })
/// .backend(shared.clone())
/// .max_attempts(8)
/// .build()?;
///
/// queue.start();
/// queue.add_item(job);
/// ```
///
/// Dropping the queue stops it. Its persisted records stay behind so that a
/// live peer can reclaim them.
pub struct Queue<T: Item> {
    inner: Arc<Inner<T>>,
}

pub(crate) struct Inner<T> {
    this: Weak<Inner<T>>,
    name: String,
    id: InstanceId,
    store: NamespacedStore,
    /// Shared primary backend, used to discover and open peers.
    backend: Arc<dyn StorageBackend>,
    scheduler: Scheduler,
    ids: Box<dyn IdGenerator>,
    processor: Box<dyn Processor<T>>,
    retry: Box<dyn RetryPolicy<T>>,
    options: QueueOptions,
    sinks: RwLock<Vec<Arc<dyn EventSink<T>>>>,
    turn: ReentrantMutex<()>,
    state: Mutex<EngineState>,
    wake: Mutex<Option<TaskHandle>>,
    /// Set when due entries were left queued because in-progress was full.
    blocked: AtomicBool,
}

/// Everything the builder resolved.
pub(crate) struct Wiring<T> {
    pub name: String,
    pub backend: Arc<dyn StorageBackend>,
    pub fallback: Option<Arc<dyn StorageBackend>>,
    pub clock: Arc<dyn Clock>,
    pub processor: Box<dyn Processor<T>>,
    pub retry: Box<dyn RetryPolicy<T>>,
    pub options: QueueOptions,
    pub sinks: Vec<Arc<dyn EventSink<T>>>,
}

impl<T: Item> Queue<T> {
    pub fn builder(name: impl Into<String>, processor: impl Processor<T> + 'static) -> QueueBuilder<T> {
        QueueBuilder::new(name, processor)
    }

    pub(crate) fn wire(wiring: Wiring<T>) -> Self {
        let ids = UlidGenerator::new(Arc::clone(&wiring.clock));
        let id = ids.generate_instance_id();
        let scheduler = Scheduler::new(wiring.clock).with_late_factor(wiring.options.late_factor);
        let store = NamespacedStore::new(
            wiring.name.clone(),
            id.clone(),
            Arc::clone(&wiring.backend),
            wiring.fallback,
        );

        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            name: wiring.name,
            id,
            store,
            backend: wiring.backend,
            scheduler,
            ids: Box::new(ids),
            processor: wiring.processor,
            retry: wiring.retry,
            options: wiring.options,
            sinks: RwLock::new(wiring.sinks),
            turn: ReentrantMutex::new(()),
            state: Mutex::new(EngineState::Stopped),
            wake: Mutex::new(None),
            blocked: AtomicBool::new(false),
        });
        inner.initialize();
        Self { inner }
    }

    pub fn id(&self) -> &InstanceId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Start heartbeating, scanning for abandoned peers and processing.
    ///
    /// Starting a running queue restarts it.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Cancel every scheduled task. In-flight processors are not interrupted.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn add_item(&self, item: T) {
        let _turn = self.inner.turn.lock();
        let entry = QueueEntry::new(item, 0, self.inner.now());
        self.inner.enqueue(entry);
    }

    /// Add an item carrying a dedup token, consulted when peers merge work.
    pub fn add_item_with_id(&self, item: T, id: impl Into<String>) {
        let _turn = self.inner.turn.lock();
        let entry = QueueEntry::new(item, 0, self.inner.now()).with_id(id);
        self.inner.enqueue(entry);
    }

    /// Schedule `item` for attempt `attempt_number` after its backoff, or
    /// discard it once `attempt_number` exceeds `max_attempts`.
    pub fn requeue(&self, item: T, attempt_number: u32, error: Option<&ProcessError>) {
        self.inner.requeue(item, attempt_number, None, error);
    }

    pub fn subscribe(&self, sink: impl EventSink<T> + 'static) {
        self.inner.sinks.write().push(Arc::new(sink));
    }

    /// Snapshot of the persisted queue, earliest first.
    pub fn queued(&self) -> Vec<QueueEntry<T>> {
        self.inner.read_queue()
    }

    pub fn in_progress(&self) -> InProgressMap<T> {
        self.inner.read_in_progress()
    }

    pub fn counts(&self) -> QueueCounts {
        let queued = self
            .inner
            .store
            .get::<Vec<IgnoredAny>>(Field::Queue)
            .map_or(0, |queue| queue.len());
        let in_progress = self
            .inner
            .store
            .get::<BTreeMap<String, IgnoredAny>>(Field::InProgress)
            .map_or(0, |map| map.len());
        QueueCounts { queued, in_progress }
    }

    /// Every other instance of this queue name, with its observed liveness.
    pub fn peers(&self) -> Vec<(InstanceId, Liveness)> {
        let inner = &self.inner;
        let now = inner.now();
        let timeout = duration_millis(inner.options.timeouts.reclaim_timeout);
        enumerate_instances(inner.backend.as_ref(), &inner.name)
            .into_iter()
            .filter(|peer| *peer != inner.id)
            .map(|peer| {
                let record = read_liveness(&inner.peer_store(peer.clone()));
                (peer, record.observe(now, timeout))
            })
            .collect()
    }
}

impl<T: Item> Drop for Queue<T> {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl<T: Item> Inner<T> {
    fn initialize(&self) {
        self.write_in_progress(&InProgressMap::new());
        self.write_queue(&[]);
        self.store.set(Field::Ack, &self.now());
        debug!(queue = %self.name, instance = %self.id, "queue instance created");
    }

    fn now(&self) -> Timestamp {
        self.scheduler.now()
    }

    fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    fn start(&self) {
        let _turn = self.turn.lock();
        if self.is_running() {
            self.stop();
        }
        *self.state.lock() = EngineState::Running;
        info!(queue = %self.name, instance = %self.id, "queue started");

        self.heartbeat();
        self.check_reclaim();
        self.process_head();
    }

    fn stop(&self) {
        let _turn = self.turn.lock();
        self.scheduler.cancel_all();
        *self.wake.lock() = None;
        self.blocked.store(false, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.state.lock(), EngineState::Stopped);
        if previous.is_running() {
            info!(queue = %self.name, instance = %self.id, "queue stopped");
        }
    }

    // ========================================
    // 永続化レコード
    // ========================================

    fn read_queue(&self) -> Vec<QueueEntry<T>> {
        self.store.get(Field::Queue).unwrap_or_default()
    }

    fn write_queue(&self, queue: &[QueueEntry<T>]) {
        self.store.set(Field::Queue, queue);
    }

    fn read_in_progress(&self) -> InProgressMap<T> {
        self.store.get(Field::InProgress).unwrap_or_default()
    }

    fn write_in_progress(&self, in_progress: &InProgressMap<T>) {
        self.store.set(Field::InProgress, in_progress);
    }

    fn peer_store(&self, peer: InstanceId) -> NamespacedStore {
        NamespacedStore::peer(self.name.clone(), peer, Arc::clone(&self.backend))
    }

    fn emit(&self, event: &QueueEvent<T>) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.emit(event);
        }
    }

    // ========================================
    // キュー操作
    // ========================================

    fn enqueue(&self, entry: QueueEntry<T>) {
        let _turn = self.turn.lock();
        debug!(queue = %self.name, instance = %self.id, attempt = entry.attempt_number, at = entry.time, "enqueue");

        let mut queue = self.read_queue();
        queue.push(entry);
        sort_by_time(&mut queue);
        let evicted = self.trim_to_capacity(&mut queue);
        self.write_queue(&queue);
        self.report_overflow(evicted);

        if self.is_running() {
            self.process_head();
        }
    }

    fn requeue(
        &self,
        item: T,
        attempt_number: u32,
        id: Option<String>,
        error: Option<&ProcessError>,
    ) {
        let _turn = self.turn.lock();
        let delay = self
            .retry
            .delay(attempt_number)
            .min(self.options.timeouts.max_queue_delay);
        let exhausted = self
            .options
            .max_attempts
            .is_some_and(|max| attempt_number > max);

        if exhausted || !self.retry.should_retry(&item, attempt_number, error) {
            debug!(queue = %self.name, instance = %self.id, attempt = attempt_number, "discarding item");
            self.emit(&QueueEvent::Discard {
                item,
                attempt_number,
            });
            return;
        }
        let time = self.now().saturating_add(duration_millis(delay));
        self.enqueue(QueueEntry {
            item,
            attempt_number,
            time,
            id,
        });
    }

    /// Drop the earliest entries beyond `max_items`.
    fn trim_to_capacity(&self, queue: &mut Vec<QueueEntry<T>>) -> Vec<QueueEntry<T>> {
        let Some(max) = self.options.max_items else {
            return Vec::new();
        };
        let excess = queue.len().saturating_sub(max);
        queue.drain(..excess).collect()
    }

    fn report_overflow(&self, evicted: Vec<QueueEntry<T>>) {
        if !evicted.is_empty() {
            warn!(queue = %self.name, instance = %self.id, evicted = evicted.len(), "queue full, evicting oldest entries");
        }
        for entry in evicted {
            self.emit(&QueueEvent::Overflow {
                item: entry.item,
                attempt_number: entry.attempt_number,
            });
        }
    }

    // ========================================
    // 処理ループ
    // ========================================

    fn process_head(&self) {
        let _turn = self.turn.lock();
        self.cancel_wake();

        let now = self.now();
        let mut queue = self.read_queue();
        let mut in_progress = self.read_in_progress();
        let mut batch = Vec::new();
        let mut blocked = false;

        while queue.first().is_some_and(|head| head.time <= now) {
            if self.options.max_items.is_some_and(|max| in_progress.len() >= max) {
                debug!(queue = %self.name, instance = %self.id, in_progress = in_progress.len(), "in-progress set full, holding back");
                blocked = true;
                break;
            }
            let entry = queue.remove(0);
            let claim = self.ids.generate_claim_id();
            let claimed = entry.claim(now);
            batch.push((claim.clone(), claimed.clone()));
            in_progress.insert(claim, claimed);
        }
        self.blocked.store(blocked, Ordering::SeqCst);
        self.write_queue(&queue);
        self.write_in_progress(&in_progress);

        for (claim, claimed) in batch {
            self.dispatch(claim, claimed);
        }

        // the processor may have completed or added items synchronously
        let queue = self.read_queue();
        self.cancel_wake();
        if !self.is_running() || self.blocked.load(Ordering::SeqCst) {
            return;
        }
        if let Some(head) = queue.first() {
            let delay = head.time.saturating_sub(self.now()).max(0);
            let handle = self.schedule(
                Duration::from_millis(delay as u64),
                LatePolicy::Run,
                Self::process_head,
            );
            *self.wake.lock() = Some(handle);
        }
    }

    fn dispatch(&self, claim: ClaimId, claimed: InProgressEntry<T>) {
        debug!(queue = %self.name, instance = %self.id, claim = %claim, attempt = claimed.attempt_number, "dispatch");
        let InProgressEntry {
            item,
            attempt_number,
            id,
            ..
        } = claimed;
        let done = Done::new(self.this.clone(), claim.clone(), item.clone(), attempt_number, id);
        let outcome = catch_unwind(AssertUnwindSafe(|| self.processor.process(item, done)));
        if let Err(payload) = outcome {
            error!(
                queue = %self.name,
                instance = %self.id,
                claim = %claim,
                panic = panic_message(&*payload),
                "processor panicked, leaving item in progress"
            );
        }
    }

    fn complete(
        &self,
        claim: ClaimId,
        item: T,
        attempt_number: u32,
        id: Option<String>,
        error: Option<ProcessError>,
        response: Option<serde_json::Value>,
    ) {
        let _turn = self.turn.lock();
        let mut in_progress = self.read_in_progress();
        if in_progress.remove(&claim).is_none() {
            debug!(queue = %self.name, instance = %self.id, claim = %claim, "claim no longer in progress");
        }
        self.write_in_progress(&in_progress);

        self.emit(&QueueEvent::Processed {
            error: error.clone(),
            response,
            item: item.clone(),
        });
        if let Some(error) = error {
            self.requeue(item, attempt_number.saturating_add(1), id, Some(&error));
        }

        if self.is_running() && self.blocked.swap(false, Ordering::SeqCst) {
            self.process_head();
        }
    }

    fn cancel_wake(&self) {
        let pending = self.wake.lock().take();
        if let Some(handle) = pending {
            self.scheduler.cancel(handle);
        }
    }

    /// Arm a task that runs under the turn lock, and only while running.
    fn schedule(
        &self,
        delay: Duration,
        policy: LatePolicy,
        task: impl FnOnce(&Inner<T>) + Send + 'static,
    ) -> TaskHandle {
        let this = self.this.clone();
        self.scheduler.run_with(
            move || {
                let Some(inner) = this.upgrade() else {
                    return;
                };
                let _turn = inner.turn.lock();
                if inner.is_running() {
                    task(&*inner);
                }
            },
            delay,
            policy,
        )
    }

    // ========================================
    // ハートビートと回収
    // ========================================

    fn heartbeat(&self) {
        self.store.set(Field::Ack, &self.now());
        self.store.remove(Field::ReclaimStart);
        self.store.remove(Field::ReclaimEnd);
        self.schedule(self.options.timeouts.ack_timer, LatePolicy::Run, Self::heartbeat);
    }

    fn check_reclaim(&self) {
        let now = self.now();
        let timeout = duration_millis(self.options.timeouts.reclaim_timeout);

        for peer in enumerate_instances(self.backend.as_ref(), &self.name) {
            if peer == self.id {
                continue;
            }
            if read_liveness(&self.peer_store(peer.clone())).is_stale(now, timeout) {
                self.try_reclaim(peer);
            }
        }
        self.schedule(
            self.options.timeouts.reclaim_timer,
            LatePolicy::Reschedule,
            Self::check_reclaim,
        );
    }

    /// Phase A: mark the peer as being reclaimed by us.
    fn try_reclaim(&self, peer: InstanceId) {
        debug!(queue = %self.name, instance = %self.id, peer = %peer, "peer looks abandoned, claiming");
        let store = self.peer_store(peer.clone());
        store.set(Field::ReclaimStart, &self.id);
        store.set(Field::Ack, &self.now());

        self.schedule(self.options.timeouts.reclaim_wait, LatePolicy::Abandon, move |inner| {
            inner.confirm_reclaim(peer)
        });
    }

    /// Phase B: still ours after one wait, so mark the end.
    fn confirm_reclaim(&self, peer: InstanceId) {
        let store = self.peer_store(peer.clone());
        if store.get::<InstanceId>(Field::ReclaimStart).as_ref() != Some(&self.id) {
            debug!(queue = %self.name, instance = %self.id, peer = %peer, "lost reclaim before confirming");
            return;
        }
        store.set(Field::ReclaimEnd, &self.id);

        self.schedule(self.options.timeouts.reclaim_wait, LatePolicy::Abandon, move |inner| {
            inner.finish_reclaim(peer)
        });
    }

    fn finish_reclaim(&self, peer: InstanceId) {
        let store = self.peer_store(peer.clone());
        let record = read_liveness(&store);
        if record.reclaim_start.as_ref() != Some(&self.id)
            || record.reclaim_end.as_ref() != Some(&self.id)
        {
            debug!(queue = %self.name, instance = %self.id, peer = %peer, "lost reclaim before merging");
            return;
        }
        self.reclaim(&store);
    }

    /// Adopt every queued and in-progress entry of `peer`, then delete its records.
    fn reclaim(&self, peer: &NamespacedStore) {
        let now = self.now();
        let their_queue: Vec<QueueEntry<T>> = peer.get(Field::Queue).unwrap_or_default();
        let their_in_progress: InProgressMap<T> = peer.get(Field::InProgress).unwrap_or_default();

        let mut queue = self.read_queue();
        let adopted = merge_entries(&mut queue, their_queue, their_in_progress.into_values(), now);
        sort_by_time(&mut queue);
        let evicted = self.trim_to_capacity(&mut queue);
        self.write_queue(&queue);
        peer.remove_all();

        info!(queue = %self.name, instance = %self.id, peer = %peer.id(), adopted, "reclaimed abandoned instance");
        self.report_overflow(evicted);

        if self.is_running() {
            self.process_head();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
