//! The contract every persisted type implements.
//!
//! A storable object is shared through an [`ObjectRef`]
//! (`Rc<RefCell<dyn Storable>>`): the pool, the objects that reference it,
//! and application code all hold clones of the same handle. The pool never
//! keeps a borrow of an object across a call into another object, so an
//! object may freely call back into the pool from any hook.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use opool_types::{Puuid, Record};

use crate::error::{PoolError, PoolResult};
use crate::pool::{ObjectPool, PoolInner};

/// Shared handle to a live storable object.
pub type ObjectRef = Rc<RefCell<dyn Storable>>;

/// Behaviour of an object that can live in an [`ObjectPool`].
///
/// Hooks are called by the pool in this order:
///
/// - storing: `record_for_store` (once per commit in which the object is
///   dirty);
/// - loading: the registered factory, then `load_from_record`, then
///   `did_init_from_record`, and once the whole load wave has settled,
///   `did_load_from_store`.
///
/// `load_from_record` must not borrow the objects it resolves: they may be
/// mid-construction as part of the same (possibly cyclic) load. Anything
/// that needs a fully built neighbour belongs in `did_load_from_store`.
pub trait Storable: Any {
    /// Immutable identity, assigned at creation.
    fn puuid(&self) -> &Puuid;

    /// Registered type name written into the record.
    fn type_name(&self) -> &str;

    /// Objects answering `false` are never admitted into a pool.
    fn should_store(&self) -> bool {
        true
    }

    /// Prototype/template values answer `false`; admitting one is fatal.
    fn is_instance(&self) -> bool {
        true
    }

    /// Serialize into a record, encoding references with
    /// [`ObjectPool::ref_value`].
    fn record_for_store(&self, pool: &ObjectPool) -> PoolResult<Record>;

    /// Apply the fields of `record`, resolving references with
    /// [`ObjectPool::unref_value`].
    fn load_from_record(&mut self, record: &Record, pool: &ObjectPool) -> PoolResult<()>;

    /// Runs right after `load_from_record`, inside the load.
    fn did_init_from_record(&mut self, _pool: &ObjectPool) {}

    /// Runs once per load wave, after every object of the wave is built.
    fn did_load_from_store(&mut self, _pool: &ObjectPool) {}

    /// Puuids this object references without having materialized them.
    /// The collector keeps their records alive.
    fn lazy_pids(&self, _pids: &mut BTreeSet<Puuid>) {}

    /// Receives the pool's mutation observer on admission and `None` when
    /// the pool lets go of the object. Objects that never call
    /// [`MutationObserver::did_mutate`] can ignore it and have their owner
    /// call [`ObjectPool::add_dirty_object`] instead.
    fn set_observer(&mut self, _observer: Option<MutationObserver>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A [`Storable`] that can be registered in a
/// [`TypeRegistry`](crate::TypeRegistry) and rebuilt from its records.
pub trait StorableType: Storable + Sized {
    /// Name written into the `type` field of this type's records.
    const TYPE_NAME: &'static str;

    /// Build an empty instance carrying `record.id`. Fields are applied
    /// afterwards through `load_from_record`. Returning `None` skips the
    /// record.
    fn instance_from_record(record: &Record, pool: &ObjectPool) -> PoolResult<Option<Self>>;
}

/// Wrap an object into a shared [`ObjectRef`].
pub fn new_object_ref<T: Storable>(object: T) -> ObjectRef {
    Rc::new(RefCell::new(object))
}

/// Convenience accessors on [`ObjectRef`].
pub trait ObjectRefExt {
    /// The object's puuid. Fails if the object is mutably borrowed.
    fn pid(&self) -> PoolResult<Puuid>;

    /// Pointer identity, ignoring trait-object metadata.
    fn same_object(&self, other: &ObjectRef) -> bool;

    /// Borrow as concrete type `T`. `None` if busy or of another type.
    fn with<T: Storable, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R>;

    /// Mutably borrow as concrete type `T`. `None` if busy or of another type.
    fn with_mut<T: Storable, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R>;
}

impl ObjectRefExt for ObjectRef {
    fn pid(&self) -> PoolResult<Puuid> {
        let object = self.try_borrow().map_err(|_| PoolError::Busy("pid lookup"))?;
        Ok(object.puuid().clone())
    }

    fn same_object(&self, other: &ObjectRef) -> bool {
        std::ptr::eq(
            Rc::as_ptr(self) as *const (),
            Rc::as_ptr(other) as *const (),
        )
    }

    fn with<T: Storable, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let object = self.try_borrow().ok()?;
        object.as_any().downcast_ref::<T>().map(f)
    }

    fn with_mut<T: Storable, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut object = self.try_borrow_mut().ok()?;
        object.as_any_mut().downcast_mut::<T>().map(f)
    }
}

/// Per-object link back to the pool that admitted it.
///
/// Holds only a weak reference, so an object outliving its pool simply stops
/// reporting mutations.
#[derive(Clone)]
pub struct MutationObserver {
    pid: Puuid,
    pool: Weak<PoolInner>,
}

impl MutationObserver {
    pub(crate) fn new(pid: Puuid, pool: Weak<PoolInner>) -> Self {
        Self { pid, pool }
    }

    pub fn pid(&self) -> &Puuid {
        &self.pid
    }

    /// Report that the observed object changed and needs to be stored.
    pub fn did_mutate(&self) {
        if let Some(inner) = self.pool.upgrade() {
            ObjectPool::from_inner(inner).on_did_mutate(&self.pid);
        }
    }

    /// Returns `true` while the owning pool is alive.
    pub fn is_attached(&self) -> bool {
        self.pool.strong_count() > 0
    }
}

impl fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationObserver")
            .field("pid", &self.pid)
            .field("attached", &self.is_attached())
            .finish()
    }
}
