//! The object pool: admission, dirty tracking, batched commits, and lazy
//! loading of an object graph persisted in a [`RecordStore`].
//!
//! # State
//!
//! - *active*: puuid -> live object, for every object the pool knows about.
//! - *dirty*: active objects with unflushed mutations.
//! - *loading*: puuids whose record is being turned into an object.
//! - *storing*: puuids written by the current commit transaction.
//! - *load wave*: objects built since the last finalization, waiting for
//!   their `did_load_from_store` hook.
//!
//! # Invariants
//!
//! - dirty is a subset of active.
//! - No puuid is loading and storing at the same time.
//! - A puuid is bound to at most one live object.
//!
//! The pool is single threaded. All work the pool defers (commits and load
//! finalization) goes through its [`Scheduler`] and runs when the owner calls
//! [`ObjectPool::run_due_jobs`] or [`ObjectPool::settle`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use opool_sched::{JobKey, Scheduler};
use opool_store::{RecordStore, StoreResult};
use opool_types::{Puuid, Record, ROOT_KEY};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::event::PoolOpened;
use crate::registry::TypeRegistry;
use crate::storable::{MutationObserver, ObjectRef, ObjectRefExt};

/// Scheduler method name of the commit job.
pub const COMMIT_JOB: &str = "commit_store_dirty_objects";

/// Scheduler method name of the load-wave finalization job.
pub const FINALIZE_JOB: &str = "did_init_loading_pids";

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) registry: TypeRegistry,
    pub(crate) store: RefCell<Option<Box<dyn RecordStore>>>,
    pub(crate) scheduler: RefCell<Scheduler>,
    pub(crate) active: RefCell<HashMap<Puuid, ObjectRef>>,
    pub(crate) dirty: RefCell<BTreeMap<Puuid, ObjectRef>>,
    pub(crate) loading: RefCell<BTreeSet<Puuid>>,
    pub(crate) storing: RefCell<BTreeSet<Puuid>>,
    pub(crate) load_wave: RefCell<Vec<Puuid>>,
    pub(crate) load_depth: Cell<usize>,
    pub(crate) finalizing: Cell<bool>,
    pub(crate) root: RefCell<Option<ObjectRef>>,
    pub(crate) opened: watch::Sender<Option<PoolOpened>>,
    pub(crate) closed: Cell<bool>,
}

/// Handle to a persistent object pool.
///
/// Cloning the handle is cheap; all clones share the same pool.
#[derive(Clone)]
pub struct ObjectPool {
    inner: Rc<PoolInner>,
}

/// Increments a depth counter for its lifetime.
struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Holds a flag raised for its lifetime.
struct FlagGuard<'a>(&'a Cell<bool>);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Objects written by one commit, kept so a failed transaction can put them
/// back into the dirty set.
pub(crate) type StoredBatch = Vec<(Puuid, ObjectRef)>;

impl ObjectPool {
    /// Create a pool over `store`. Nothing is read until [`open`](Self::open).
    pub fn new(
        store: Box<dyn RecordStore>,
        registry: TypeRegistry,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        Self::with_scheduler(store, registry, config, Scheduler::new())
    }

    /// Create a pool driven by an explicitly supplied scheduler.
    pub fn with_scheduler(
        store: Box<dyn RecordStore>,
        registry: TypeRegistry,
        config: PoolConfig,
        scheduler: Scheduler,
    ) -> PoolResult<Self> {
        config.validate()?;
        let (opened, _) = watch::channel(None);
        Ok(Self {
            inner: Rc::new(PoolInner {
                config,
                registry,
                store: RefCell::new(Some(store)),
                scheduler: RefCell::new(scheduler),
                active: RefCell::new(HashMap::new()),
                dirty: RefCell::new(BTreeMap::new()),
                loading: RefCell::new(BTreeSet::new()),
                storing: RefCell::new(BTreeSet::new()),
                load_wave: RefCell::new(Vec::new()),
                load_depth: Cell::new(0),
                finalizing: Cell::new(false),
                root: RefCell::new(None),
                opened,
                closed: Cell::new(false),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<PoolInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Open the record store, run the initial collection pass (if
    /// configured), then fire the opened event.
    pub fn open(&self) -> PoolResult<()> {
        self.ensure_not_closed()?;
        self.with_store(|s| s.open())?;

        let record_count = if self.inner.config.collect_on_open {
            self.promise_collect()?
        } else {
            self.record_count()?
        };

        info!(pool = %self.inner.config.name, record_count, "pool opened");
        self.inner.opened.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(PoolOpened { record_count });
            true
        });
        Ok(())
    }

    /// Receiver that turns `Some` exactly once, when `open` completes.
    pub fn subscribe_opened(&self) -> watch::Receiver<Option<PoolOpened>> {
        self.inner.opened.subscribe()
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.get()
            && self
                .inner
                .store
                .borrow()
                .as_ref()
                .is_some_and(|s| s.is_open())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Detach every object, drop all in-memory state and hand the record
    /// store back to the caller.
    ///
    /// Pending commits are *not* run: anything still dirty is lost. Call
    /// [`settle`](Self::settle) first to flush. Returns `None` if the pool
    /// was already closed.
    pub fn close(&self) -> Option<Box<dyn RecordStore>> {
        if self.inner.closed.replace(true) {
            return None;
        }

        let objects: Vec<ObjectRef> = self
            .inner
            .active
            .borrow_mut()
            .drain()
            .map(|(_, obj)| obj)
            .collect();
        for obj in &objects {
            if let Ok(mut o) = obj.try_borrow_mut() {
                o.set_observer(None);
            }
        }

        let unflushed = std::mem::take(&mut *self.inner.dirty.borrow_mut()).len();
        if unflushed > 0 {
            warn!(pool = %self.inner.config.name, unflushed, "closing with unflushed objects");
        }
        self.inner.loading.borrow_mut().clear();
        self.inner.storing.borrow_mut().clear();
        self.inner.load_wave.borrow_mut().clear();
        self.inner.root.borrow_mut().take();
        self.inner
            .scheduler
            .borrow_mut()
            .cancel_target(&self.inner.config.name);

        let mut store = self.inner.store.borrow_mut().take();
        if let Some(store) = store.as_mut() {
            if store.in_transaction() {
                if let Err(e) = store.rollback_transaction() {
                    error!(error = %e, "rollback on close failed");
                }
            }
        }
        info!(pool = %self.inner.config.name, released = objects.len(), "pool closed");
        store
    }

    // ---------------------------------------------------------------
    // Root management
    // ---------------------------------------------------------------

    /// The puuid stored under the root pointer, if any.
    pub fn root_pid(&self) -> PoolResult<Option<Puuid>> {
        let raw = self.with_store(|s| s.get(ROOT_KEY))?;
        Ok(raw.map(|pid| Puuid::parse(&pid)).transpose()?)
    }

    /// Write the root pointer. Only allowed while no root is established;
    /// setting the same puuid again is a no-op.
    ///
    /// A pointer whose record was never committed (the pool closed before
    /// its first flush) does not establish a root and may be replaced.
    pub fn set_root_pid(&self, pid: &Puuid) -> PoolResult<()> {
        self.ensure_not_closed()?;
        if let Some(existing) = self.root_pid()? {
            if &existing == pid {
                return Ok(());
            }
            if self.root_is_established(&existing)? {
                return Err(PoolError::RootAlreadySet {
                    existing,
                    requested: pid.clone(),
                });
            }
            warn!(stale = %existing, pid = %pid, "replacing root pointer to a missing record");
        }

        self.with_store(|s| {
            if s.in_transaction() {
                return s.put(ROOT_KEY, pid.as_str());
            }
            s.begin_transaction()?;
            match s.put(ROOT_KEY, pid.as_str()) {
                Ok(()) => s.commit_transaction(),
                Err(e) => {
                    let _ = s.rollback_transaction();
                    Err(e)
                }
            }
        })?;
        info!(pid = %pid, "root pointer set");
        Ok(())
    }

    fn root_is_established(&self, pid: &Puuid) -> PoolResult<bool> {
        if self.is_active(pid) {
            return Ok(true);
        }
        self.with_store(|s| s.has_key(pid.as_str()))
    }

    /// Resolve (and cache) the root object. `Ok(None)` if no root is stored.
    pub fn read_root(&self) -> PoolResult<Option<ObjectRef>> {
        let cached = self.inner.root.borrow().clone();
        if let Some(root) = cached {
            return Ok(Some(root));
        }
        let Some(pid) = self.root_pid()? else {
            return Ok(None);
        };
        let root = self.object_for_pid(&pid)?;
        if let Some(root) = &root {
            *self.inner.root.borrow_mut() = Some(root.clone());
        }
        Ok(root)
    }

    /// The root object; fails with [`PoolError::MissingRoot`] if none exists.
    pub fn root(&self) -> PoolResult<ObjectRef> {
        self.read_root()?.ok_or(PoolError::MissingRoot)
    }

    /// Return the stored root, or make `factory()` the root: admitted,
    /// dirty, and pointed at by the root pointer.
    pub fn root_or_create(&self, factory: impl FnOnce() -> ObjectRef) -> PoolResult<ObjectRef> {
        if let Some(root) = self.read_root()? {
            return Ok(root);
        }

        let root = factory();
        if !self.add_active_object(&root)? {
            let o = root.try_borrow().map_err(|_| PoolError::Busy("root creation"))?;
            return Err(PoolError::NotStorable {
                pid: o.puuid().clone(),
                type_name: o.type_name().to_string(),
            });
        }
        let pid = root.pid()?;
        self.set_root_pid(&pid)?;
        self.add_dirty_pid(&pid)?;
        *self.inner.root.borrow_mut() = Some(root.clone());
        info!(pid = %pid, "root object created");
        Ok(root)
    }

    // ---------------------------------------------------------------
    // Admission and dirty tracking
    // ---------------------------------------------------------------

    /// Admit `obj` into the pool and start observing its mutations.
    ///
    /// Returns `Ok(false)` (with a warning) for objects that refuse storage,
    /// and an error for values that are not instances.
    pub fn add_active_object(&self, obj: &ObjectRef) -> PoolResult<bool> {
        self.ensure_not_closed()?;
        let (pid, type_name, should_store, is_instance) = {
            let o = obj.try_borrow().map_err(|_| PoolError::Busy("admission"))?;
            (
                o.puuid().clone(),
                o.type_name().to_string(),
                o.should_store(),
                o.is_instance(),
            )
        };

        if !should_store {
            warn!(pid = %pid, type_name, "object is not storable, not admitted");
            return Ok(false);
        }
        if !is_instance {
            return Err(PoolError::NotAnInstance { pid, type_name });
        }

        if let Some(existing) = self.inner.active.borrow().get(&pid) {
            if existing.same_object(obj) {
                return Ok(true);
            }
            return Err(PoolError::InvariantViolation(format!(
                "puuid {pid} is already bound to another live object"
            )));
        }

        let observer = MutationObserver::new(pid.clone(), Rc::downgrade(&self.inner));
        obj.try_borrow_mut()
            .map_err(|_| PoolError::Busy("admission"))?
            .set_observer(Some(observer));
        self.inner.active.borrow_mut().insert(pid.clone(), obj.clone());
        debug!(pid = %pid, type_name, "object admitted");
        Ok(true)
    }

    /// Mark an active object dirty and schedule a commit.
    ///
    /// A no-op while the object is being loaded or stored.
    pub fn add_dirty_object(&self, obj: &ObjectRef) -> PoolResult<()> {
        let pid = obj.pid()?;
        self.add_dirty_pid(&pid)
    }

    pub(crate) fn add_dirty_pid(&self, pid: &Puuid) -> PoolResult<()> {
        self.ensure_not_closed()?;
        if self.inner.loading.borrow().contains(pid) || self.inner.storing.borrow().contains(pid) {
            return Ok(());
        }
        let obj = self
            .inner
            .active
            .borrow()
            .get(pid)
            .cloned()
            .ok_or_else(|| {
                PoolError::InvariantViolation(format!("dirty object {pid} is not active"))
            })?;

        if self.inner.dirty.borrow_mut().insert(pid.clone(), obj).is_none() {
            debug!(pid = %pid, "object marked dirty");
        }
        self.schedule_commit();
        Ok(())
    }

    /// Mutation callback routed from every admitted object's observer.
    pub(crate) fn on_did_mutate(&self, pid: &Puuid) {
        if self.inner.closed.get() || self.is_loading_or_finalizing() {
            return;
        }
        if !self.inner.active.borrow().contains_key(pid) {
            debug!(pid = %pid, "mutation from a released object ignored");
            return;
        }
        if let Err(e) = self.add_dirty_pid(pid) {
            error!(pid = %pid, error = %e, "failed to mark mutated object dirty");
        }
    }

    fn schedule_commit(&self) {
        self.inner.scheduler.borrow_mut().schedule_once(
            &self.inner.config.name,
            COMMIT_JOB,
            self.inner.config.commit_delay(),
        );
    }

    fn is_loading_or_finalizing(&self) -> bool {
        self.inner.load_depth.get() > 0 || self.inner.finalizing.get()
    }

    pub(crate) fn restore_dirty(&self, batch: impl IntoIterator<Item = (Puuid, ObjectRef)>) {
        let active = self.inner.active.borrow();
        let mut dirty = self.inner.dirty.borrow_mut();
        for (pid, obj) in batch {
            if active.contains_key(&pid) {
                dirty.insert(pid, obj);
            }
        }
    }

    // ---------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------

    /// Flush every dirty object, and everything newly reachable from them,
    /// inside one store transaction. Returns the number of records written.
    pub fn commit_store_dirty_objects(&self) -> PoolResult<usize> {
        self.ensure_not_closed()?;
        if self.inner.dirty.borrow().is_empty() {
            return Ok(0);
        }
        self.check_invariants()?;

        self.with_store(|s| s.begin_transaction())?;
        let stored = match self.store_dirty_batch() {
            Ok(stored) => stored,
            Err(e) => {
                self.rollback_quietly();
                return Err(e);
            }
        };
        if let Err(e) = self.with_store(|s| s.commit_transaction()) {
            self.restore_dirty(stored);
            return Err(e);
        }

        info!(pool = %self.inner.config.name, stored = stored.len(), "dirty objects committed");
        Ok(stored.len())
    }

    /// Write the transitive closure of the dirty set into the active
    /// transaction. Returns the number of records written.
    pub fn store_dirty_objects(&self) -> PoolResult<usize> {
        Ok(self.store_dirty_batch()?.len())
    }

    /// Repeatedly snapshot-and-clear the dirty set and store each object.
    /// Storing may discover new objects through `ref_value`; they land in
    /// the dirty set and are picked up by the next round. Stops after a
    /// round that stores nothing.
    pub(crate) fn store_dirty_batch(&self) -> PoolResult<StoredBatch> {
        let mut stored = Vec::new();
        let result = self.store_rounds(&mut stored);
        self.inner.storing.borrow_mut().clear();
        match result {
            Ok(rounds) => {
                debug!(rounds, stored = stored.len(), "dirty set converged");
                Ok(stored)
            }
            Err(e) => {
                self.restore_dirty(stored);
                Err(e)
            }
        }
    }

    fn store_rounds(&self, stored: &mut StoredBatch) -> PoolResult<usize> {
        let mut rounds = 0;
        loop {
            let bucket = std::mem::take(&mut *self.inner.dirty.borrow_mut());
            if bucket.is_empty() {
                return Ok(rounds);
            }
            rounds += 1;

            let mut pending = bucket.into_iter();
            while let Some((pid, obj)) = pending.next() {
                if let Err(e) = self.store_object(&pid, &obj) {
                    self.restore_dirty(std::iter::once((pid, obj)).chain(pending));
                    return Err(e);
                }
                stored.push((pid, obj));
            }
        }
    }

    fn store_object(&self, pid: &Puuid, obj: &ObjectRef) -> PoolResult<()> {
        if self.inner.loading.borrow().contains(pid) {
            return Err(PoolError::InvariantViolation(format!(
                "{pid} is being stored while it is still loading"
            )));
        }
        if !self.inner.storing.borrow_mut().insert(pid.clone()) {
            return Err(PoolError::DoubleStore(pid.clone()));
        }

        let record = {
            let o = obj.try_borrow().map_err(|_| PoolError::Busy("store"))?;
            o.record_for_store(self)?
        };
        if &record.id != pid {
            return Err(PoolError::InvariantViolation(format!(
                "object {pid} produced a record for {}",
                record.id
            )));
        }

        let text = record.to_json()?;
        self.with_store(|s| s.put(pid.as_str(), &text))?;
        debug!(pid = %pid, type_name = %record.type_name, bytes = text.len(), "record stored");
        Ok(())
    }

    fn rollback_quietly(&self) {
        if let Err(e) = self.with_store(|s| s.rollback_transaction()) {
            error!(error = %e, "transaction rollback failed");
        }
    }

    // ---------------------------------------------------------------
    // Lazy resolution
    // ---------------------------------------------------------------

    /// Resolve `pid` to a live object, loading it from its record if needed.
    ///
    /// Returns `Ok(None)` (with a warning) if there is no record for `pid`
    /// or its type is unknown.
    pub fn object_for_pid(&self, pid: &Puuid) -> PoolResult<Option<ObjectRef>> {
        self.ensure_not_closed()?;
        if let Some(obj) = self.active_object(pid) {
            return Ok(Some(obj));
        }
        if self.inner.loading.borrow().contains(pid) {
            return Err(PoolError::InvariantViolation(format!(
                "re-entrant load of {pid} before it became active"
            )));
        }

        self.inner.loading.borrow_mut().insert(pid.clone());
        let result = match self.read_record(pid) {
            Ok(Some(record)) => self.object_for_record(&record),
            Ok(None) => {
                warn!(pid = %pid, "no record for referenced puuid");
                Ok(None)
            }
            Err(e) => Err(e),
        };
        self.inner.loading.borrow_mut().remove(pid);
        result
    }

    /// Build (or return the already active) object for `record`.
    pub fn object_for_record(&self, record: &Record) -> PoolResult<Option<ObjectRef>> {
        let pid = &record.id;
        if let Some(obj) = self.active_object(pid) {
            return Ok(Some(obj));
        }

        let type_name = self.inner.registry.resolve_name(&record.type_name);
        let Some(factory) = self.inner.registry.factory_for(type_name) else {
            warn!(pid = %pid, type_name = %record.type_name, "no factory registered for type");
            return Ok(None);
        };

        let _depth = DepthGuard::enter(&self.inner.load_depth);
        let Some(obj) = factory(record, self)? else {
            warn!(pid = %pid, type_name, "factory declined record");
            return Ok(None);
        };
        if &obj.pid()? != pid {
            return Err(PoolError::InvariantViolation(format!(
                "factory for {type_name} built an object with a different puuid than {pid}"
            )));
        }

        // Active before populating fields so back-references resolve.
        if !self.add_active_object(&obj)? {
            return Ok(None);
        }
        self.inner.loading.borrow_mut().remove(pid);
        self.join_load_wave(pid);

        let loaded = {
            let mut o = obj.try_borrow_mut().map_err(|_| PoolError::Busy("load"))?;
            o.load_from_record(record, self).map(|()| o.did_init_from_record(self))
        };
        if let Err(e) = loaded {
            self.inner.active.borrow_mut().remove(pid);
            self.inner.load_wave.borrow_mut().retain(|p| p != pid);
            return Err(e);
        }

        debug!(pid = %pid, type_name, "object loaded");
        Ok(Some(obj))
    }

    /// Run `did_load_from_store` on every object of the settled load wave.
    ///
    /// Hooks may trigger further loads; those objects join the wave and are
    /// finalized in the same call. Each object is finalized exactly once.
    pub fn did_init_loading_pids(&self) -> PoolResult<usize> {
        if self.inner.finalizing.get() {
            return Ok(0);
        }
        if !self.inner.loading.borrow().is_empty() {
            // A load is still on the stack. The wave stays put and the job
            // is re-armed once this run completes.
            return Ok(0);
        }

        let _finalizing = FlagGuard::raise(&self.inner.finalizing);
        let mut finalized = 0;
        loop {
            let wave = std::mem::take(&mut *self.inner.load_wave.borrow_mut());
            if wave.is_empty() {
                break;
            }
            for pid in wave {
                let Some(obj) = self.active_object(&pid) else {
                    continue;
                };
                match obj.try_borrow_mut() {
                    Ok(mut o) => o.did_load_from_store(self),
                    Err(_) => {
                        warn!(pid = %pid, "object busy, did_load_from_store skipped");
                        continue;
                    }
                }
                finalized += 1;
            }
        }
        if finalized > 0 {
            debug!(finalized, "load wave finalized");
        }
        Ok(finalized)
    }

    /// Add a freshly built object to the load wave. The first object of a
    /// wave schedules its finalization.
    fn join_load_wave(&self, pid: &Puuid) {
        let first = {
            let mut wave = self.inner.load_wave.borrow_mut();
            wave.push(pid.clone());
            wave.len() == 1
        };
        if first {
            self.schedule_finalize();
        }
    }

    fn schedule_finalize(&self) {
        self.inner.scheduler.borrow_mut().schedule_once(
            &self.inner.config.name,
            FINALIZE_JOB,
            Duration::ZERO,
        );
    }

    /// Read and decode the record stored under `pid`.
    pub fn read_record(&self, pid: &Puuid) -> PoolResult<Option<Record>> {
        let Some(text) = self.with_store(|s| s.get(pid.as_str()))? else {
            return Ok(None);
        };
        let record = Record::from_json(&text)?;
        if &record.id != pid {
            return Err(PoolError::InvariantViolation(format!(
                "record under key {pid} carries id {}",
                record.id
            )));
        }
        Ok(Some(record))
    }

    // ---------------------------------------------------------------
    // Scheduled jobs
    // ---------------------------------------------------------------

    /// Run every job whose debounce delay has elapsed.
    pub fn run_due_jobs(&self) -> PoolResult<usize> {
        let jobs = self.inner.scheduler.borrow_mut().take_due(Instant::now());
        self.dispatch(jobs)
    }

    /// Run every pending job immediately, repeating until none are left.
    pub fn settle(&self) -> PoolResult<usize> {
        let mut ran = 0;
        loop {
            let jobs = self.inner.scheduler.borrow_mut().take_all();
            if jobs.is_empty() {
                return Ok(ran);
            }
            ran += self.dispatch(jobs)?;
            if !self.inner.loading.borrow().is_empty() {
                // Called from inside a load; finalization waits for it.
                return Ok(ran);
            }
        }
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.inner.scheduler.borrow().is_idle()
    }

    /// Returns `true` while a commit job is queued or running.
    pub fn has_pending_commit(&self) -> bool {
        self.inner
            .scheduler
            .borrow()
            .is_scheduled(&self.inner.config.name, COMMIT_JOB)
    }

    fn dispatch(&self, jobs: Vec<JobKey>) -> PoolResult<usize> {
        let mut ran = 0;
        let mut jobs = jobs.into_iter();
        while let Some(job) = jobs.next() {
            let result = match job.method.as_str() {
                COMMIT_JOB => self.commit_store_dirty_objects().map(drop),
                FINALIZE_JOB => self.did_init_loading_pids().map(drop),
                other => {
                    warn!(job = %job, method = other, "unknown job dropped");
                    Ok(())
                }
            };
            self.inner.scheduler.borrow_mut().complete(&job);
            ran += 1;
            if job.method == FINALIZE_JOB && !self.inner.load_wave.borrow().is_empty() {
                self.schedule_finalize();
            }

            if let Err(e) = result {
                // Hand the untouched jobs back to the queue.
                let mut sched = self.inner.scheduler.borrow_mut();
                for rest in jobs {
                    sched.complete(&rest);
                    sched.schedule_once(&rest.target, &rest.method, Duration::ZERO);
                }
                error!(job = %job, error = %e, "scheduled job failed");
                return Err(e);
            }
        }
        Ok(ran)
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    pub fn active_object(&self, pid: &Puuid) -> Option<ObjectRef> {
        self.inner.active.borrow().get(pid).cloned()
    }

    pub fn is_active(&self, pid: &Puuid) -> bool {
        self.inner.active.borrow().contains_key(pid)
    }

    pub fn is_dirty(&self, pid: &Puuid) -> bool {
        self.inner.dirty.borrow().contains_key(pid)
    }

    pub fn is_loading(&self, pid: &Puuid) -> bool {
        self.inner.loading.borrow().contains(pid)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.borrow().len()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.dirty.borrow().len()
    }

    /// Puuids of dirty objects, sorted.
    pub fn dirty_pids(&self) -> Vec<Puuid> {
        self.inner.dirty.borrow().keys().cloned().collect()
    }

    /// Number of keys in the record store, root pointer included.
    pub fn record_count(&self) -> PoolResult<usize> {
        self.with_store(|s| s.count())
    }

    /// Verify the pool's set invariants.
    pub fn check_invariants(&self) -> PoolResult<()> {
        let active = self.inner.active.borrow();
        if let Some(pid) = self
            .inner
            .dirty
            .borrow()
            .keys()
            .find(|pid| !active.contains_key(*pid))
        {
            return Err(PoolError::InvariantViolation(format!(
                "dirty object {pid} is not active"
            )));
        }
        let storing = self.inner.storing.borrow();
        if let Some(pid) = self
            .inner
            .loading
            .borrow()
            .iter()
            .find(|pid| storing.contains(*pid))
        {
            return Err(PoolError::InvariantViolation(format!(
                "{pid} is loading and storing at once"
            )));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    pub(crate) fn ensure_not_closed(&self) -> PoolResult<()> {
        if self.inner.closed.get() {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    /// Run one store operation. Never call into objects from `f`.
    pub(crate) fn with_store<R>(
        &self,
        f: impl FnOnce(&mut dyn RecordStore) -> StoreResult<R>,
    ) -> PoolResult<R> {
        let mut guard = self.inner.store.borrow_mut();
        let store = guard.as_mut().ok_or(PoolError::Closed)?;
        Ok(f(store.as_mut())?)
    }

    pub(crate) fn inner(&self) -> &PoolInner {
        &self.inner
    }
}

impl fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.inner.config.name)
            .field("active", &self.inner.active.borrow().len())
            .field("dirty", &self.inner.dirty.borrow().len())
            .field("closed", &self.inner.closed.get())
            .finish()
    }
}
