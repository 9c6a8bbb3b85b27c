//! # opool-core
//!
//! A persistent object-graph pool. Application objects implement
//! [`Storable`], get admitted into an [`ObjectPool`], and from then on the
//! pool keeps the live graph and the stored graph consistent:
//!
//! - mutations mark objects dirty and schedule a debounced commit;
//! - a commit writes the transitive closure of the dirty set, including
//!   every newly referenced object, inside one store transaction;
//! - references are followed lazily, and cyclic graphs load safely because
//!   the `did_load_from_store` hook only fires once a whole load wave is
//!   built;
//! - a mark-and-sweep pass deletes records no longer reachable from the
//!   root.
//!
//! The pool is single threaded and never runs work on its own. Deferred jobs
//! fire when the owner calls [`ObjectPool::run_due_jobs`] or
//! [`ObjectPool::settle`].
//!
//! ```no_run
//! use opool_core::{ObjectPool, PoolArray, PoolConfig, TypeRegistry, new_object_ref};
//! use opool_store::InMemoryRecordStore;
//!
//! # fn main() -> opool_core::PoolResult<()> {
//! let pool = ObjectPool::new(
//!     Box::new(InMemoryRecordStore::new()),
//!     TypeRegistry::with_builtins(),
//!     PoolConfig::default(),
//! )?;
//! pool.open()?;
//! pool.root_or_create(|| new_object_ref(PoolArray::new()))?;
//! pool.settle()?;
//! # Ok(())
//! # }
//! ```

pub mod collect;
pub mod collections;
pub mod config;
pub mod error;
pub mod event;
pub mod pool;
pub mod refs;
pub mod registry;
pub mod storable;
pub mod value;

pub use collect::ReachabilityReport;
pub use collections::{PoolArray, PoolMap};
pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use event::PoolOpened;
pub use pool::{ObjectPool, COMMIT_JOB, FINALIZE_JOB};
pub use registry::{Factory, TypeRegistry};
pub use storable::{
    new_object_ref, MutationObserver, ObjectRef, ObjectRefExt, Storable, StorableType,
};
pub use value::StoreValue;

pub use opool_types::{Puuid, Record};
