//! Mark-and-sweep collection over the persisted graph.
//!
//! Marking starts at the root pointer and at every lazy pid declared by a
//! resident object, then follows reference markers through the stored
//! records. Sweeping deletes every store key that was not marked. Both run
//! inside one store transaction, after the dirty set has been flushed into
//! the same transaction, so the decision is made against the latest graph.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use opool_types::{collect_ref_pids, Puuid, ROOT_KEY};

use crate::error::{PoolError, PoolResult};
use crate::pool::ObjectPool;
use crate::storable::ObjectRef;

/// Result of a mark pass that did not sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReachabilityReport {
    /// Puuids reachable from the root or from a lazy pid.
    pub reachable: BTreeSet<Puuid>,
    /// Store keys a collection pass would delete.
    pub unreachable: Vec<String>,
    /// Referenced puuids that have no record.
    pub dangling: BTreeSet<Puuid>,
    /// Keys in the store, root pointer included.
    pub total_keys: usize,
}

impl ReachabilityReport {
    /// Returns `true` if nothing would be swept and no reference dangles.
    pub fn is_clean(&self) -> bool {
        self.unreachable.is_empty() && self.dangling.is_empty()
    }
}

#[derive(Default)]
struct Marking {
    marked: BTreeSet<Puuid>,
    dangling: BTreeSet<Puuid>,
}

impl ObjectPool {
    /// Flush dirty objects, then delete every record unreachable from the
    /// root. Returns the number of keys left in the store.
    ///
    /// With no root pointer the whole store is cleared.
    pub fn promise_collect(&self) -> PoolResult<usize> {
        self.ensure_not_closed()?;
        let Some(root_pid) = self.root_pid()? else {
            self.with_store(|s| s.clear())?;
            info!(pool = %self.config().name, "no root; record store cleared");
            return Ok(0);
        };
        self.check_invariants()?;

        self.with_store(|s| s.begin_transaction())?;
        let stored = match self.store_dirty_batch() {
            Ok(stored) => stored,
            Err(e) => {
                self.rollback_collect();
                return Err(e);
            }
        };
        let swept = match self.mark_and_sweep(&root_pid) {
            Ok(swept) => swept,
            Err(e) => {
                self.rollback_collect();
                self.restore_dirty(stored);
                return Err(e);
            }
        };
        if let Err(e) = self.with_store(|s| s.commit_transaction()) {
            self.restore_dirty(stored);
            return Err(e);
        }

        if self.config().evict_collected {
            self.evict(&swept);
        }
        let remaining = self.record_count()?;
        info!(
            pool = %self.config().name,
            flushed = stored.len(),
            swept = swept.len(),
            remaining,
            "collection pass complete"
        );
        Ok(remaining)
    }

    /// Run the mark phase against the committed store without sweeping.
    pub fn reachability_report(&self) -> PoolResult<ReachabilityReport> {
        self.ensure_not_closed()?;
        let keys = self.with_store(|s| s.keys())?;
        let marking = match self.root_pid()? {
            Some(root_pid) => self.mark(&root_pid)?,
            None => Marking::default(),
        };
        let unreachable = keys
            .iter()
            .filter(|key| !is_retained(key, &marking.marked))
            .cloned()
            .collect();
        Ok(ReachabilityReport {
            reachable: marking.marked,
            unreachable,
            dangling: marking.dangling,
            total_keys: keys.len(),
        })
    }

    fn mark_and_sweep(&self, root_pid: &Puuid) -> PoolResult<Vec<String>> {
        let marking = self.mark(root_pid)?;
        if !marking.dangling.is_empty() {
            warn!(
                dangling = marking.dangling.len(),
                "reachable references point at missing records"
            );
        }

        let keys = self.with_store(|s| s.keys())?;
        let mut swept = Vec::new();
        for key in keys {
            if is_retained(&key, &marking.marked) {
                continue;
            }
            self.with_store(|s| s.remove_key(&key))?;
            debug!(key = %key, "unreachable record swept");
            swept.push(key);
        }
        Ok(swept)
    }

    /// Depth-first walk over stored records from the root and every lazy
    /// pid of a resident object.
    fn mark(&self, root_pid: &Puuid) -> PoolResult<Marking> {
        let mut stack = vec![root_pid.clone()];
        stack.extend(self.resident_lazy_pids()?);

        let mut marking = Marking::default();
        while let Some(pid) = stack.pop() {
            if marking.marked.contains(&pid) || marking.dangling.contains(&pid) {
                continue;
            }
            let Some(record) = self.read_record(&pid)? else {
                marking.dangling.insert(pid);
                continue;
            };
            marking.marked.insert(pid);

            let mut refs = BTreeSet::new();
            for value in record.fields.values() {
                collect_ref_pids(value, &mut refs);
            }
            stack.extend(refs.into_iter().filter(|p| !marking.marked.contains(p)));
        }
        debug!(marked = marking.marked.len(), "mark phase complete");
        Ok(marking)
    }

    fn resident_lazy_pids(&self) -> PoolResult<BTreeSet<Puuid>> {
        let objects: Vec<ObjectRef> = self.inner().active.borrow().values().cloned().collect();
        let mut pids = BTreeSet::new();
        for obj in objects {
            let o = obj
                .try_borrow()
                .map_err(|_| PoolError::Busy("lazy pid scan"))?;
            o.lazy_pids(&mut pids);
        }
        Ok(pids)
    }

    fn evict(&self, swept: &[String]) {
        let mut evicted = Vec::new();
        {
            let mut active = self.inner().active.borrow_mut();
            let mut dirty = self.inner().dirty.borrow_mut();
            for key in swept {
                let Ok(pid) = Puuid::parse(key) else {
                    continue;
                };
                dirty.remove(&pid);
                if let Some(obj) = active.remove(&pid) {
                    evicted.push(obj);
                }
            }
        }
        for obj in &evicted {
            if let Ok(mut o) = obj.try_borrow_mut() {
                o.set_observer(None);
            }
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "collected objects evicted");
        }
    }

    fn rollback_collect(&self) {
        if let Err(e) = self.with_store(|s| s.rollback_transaction()) {
            warn!(error = %e, "rollback after failed collection failed");
        }
    }
}

fn is_retained(key: &str, marked: &BTreeSet<Puuid>) -> bool {
    key == ROOT_KEY || marked.contains(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::PoolArray;
    use crate::config::PoolConfig;
    use crate::registry::TypeRegistry;
    use crate::storable::{new_object_ref, ObjectRefExt};
    use crate::value::StoreValue;
    use opool_store::{InMemoryRecordStore, RecordStore};
    use opool_types::Record;

    fn pool_with(config: PoolConfig) -> ObjectPool {
        let pool = ObjectPool::new(
            Box::new(InMemoryRecordStore::new()),
            TypeRegistry::with_builtins(),
            config,
        )
        .unwrap();
        pool.open().unwrap();
        pool
    }

    fn put_raw(pool: &ObjectPool, key: &str, value: &str) {
        pool.with_store(|s| {
            s.begin_transaction()?;
            s.put(key, value)?;
            s.commit_transaction()
        })
        .unwrap();
    }

    fn orphan_record() -> (Puuid, String) {
        let pid = Puuid::generate();
        let text = Record::new(pid.clone(), "Array").to_json().unwrap();
        (pid, text)
    }

    #[test]
    fn no_root_clears_the_store() {
        let pool = pool_with(PoolConfig::default());
        let (pid, text) = orphan_record();
        put_raw(&pool, pid.as_str(), &text);
        assert_eq!(pool.record_count().unwrap(), 1);

        assert_eq!(pool.promise_collect().unwrap(), 0);
        assert_eq!(pool.record_count().unwrap(), 0);
    }

    #[test]
    fn sweeps_orphans_and_keeps_the_root_pointer() {
        let pool = pool_with(PoolConfig::default());
        let root = pool
            .root_or_create(|| new_object_ref(PoolArray::new()))
            .unwrap();
        root.with_mut::<PoolArray, _>(|a| a.push(new_object_ref(PoolArray::new())))
            .unwrap();
        let (orphan, text) = orphan_record();
        put_raw(&pool, orphan.as_str(), &text);

        assert_eq!(pool.promise_collect().unwrap(), 3);
        assert!(pool.read_record(&orphan).unwrap().is_none());
        assert_eq!(pool.root_pid().unwrap(), Some(root.pid().unwrap()));
        assert_eq!(pool.dirty_count(), 0);
    }

    #[test]
    fn report_does_not_sweep() {
        let pool = pool_with(PoolConfig::default());
        pool.root_or_create(|| new_object_ref(PoolArray::new()))
            .unwrap();
        pool.settle().unwrap();
        let (orphan, text) = orphan_record();
        put_raw(&pool, orphan.as_str(), &text);

        let report = pool.reachability_report().unwrap();
        assert_eq!(report.total_keys, 3);
        assert_eq!(report.reachable.len(), 1);
        assert_eq!(report.unreachable, vec![orphan.to_string()]);
        assert!(!report.is_clean());
        assert_eq!(pool.record_count().unwrap(), 3);
    }

    #[test]
    fn dangling_references_are_reported() {
        let pool = pool_with(PoolConfig::default());
        let root = pool
            .root_or_create(|| new_object_ref(PoolArray::new()))
            .unwrap();
        let child = new_object_ref(PoolArray::new());
        root.with_mut::<PoolArray, _>(|a| a.push(StoreValue::Object(child.clone())))
            .unwrap();
        pool.settle().unwrap();

        let child_pid = child.pid().unwrap();
        pool.with_store(|s| {
            s.begin_transaction()?;
            s.remove_key(child_pid.as_str())?;
            s.commit_transaction()
        })
        .unwrap();

        let report = pool.reachability_report().unwrap();
        assert!(report.dangling.contains(&child_pid));
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn swept_objects_stay_resident_by_default() {
        let pool = pool_with(PoolConfig::default());
        let root = pool
            .root_or_create(|| new_object_ref(PoolArray::new()))
            .unwrap();
        let child = new_object_ref(PoolArray::new());
        root.with_mut::<PoolArray, _>(|a| a.push(child.clone()))
            .unwrap();
        pool.settle().unwrap();

        root.with_mut::<PoolArray, _>(|a| a.clear()).unwrap();
        pool.promise_collect().unwrap();

        let child_pid = child.pid().unwrap();
        assert!(pool.read_record(&child_pid).unwrap().is_none());
        assert!(pool.is_active(&child_pid));

        child
            .with_mut::<PoolArray, _>(|a| a.push(1i64))
            .unwrap();
        pool.settle().unwrap();
        assert!(pool.read_record(&child_pid).unwrap().is_some());
    }

    #[test]
    fn evict_collected_releases_swept_objects() {
        let pool = pool_with(PoolConfig {
            evict_collected: true,
            ..PoolConfig::default()
        });
        let root = pool
            .root_or_create(|| new_object_ref(PoolArray::new()))
            .unwrap();
        let child = new_object_ref(PoolArray::new());
        root.with_mut::<PoolArray, _>(|a| a.push(child.clone()))
            .unwrap();
        pool.settle().unwrap();

        root.with_mut::<PoolArray, _>(|a| a.clear()).unwrap();
        pool.promise_collect().unwrap();

        let child_pid = child.pid().unwrap();
        assert!(!pool.is_active(&child_pid));
        child
            .with_mut::<PoolArray, _>(|a| a.push(1i64))
            .unwrap();
        assert!(!pool.is_dirty(&child_pid));
        pool.settle().unwrap();
        assert!(pool.read_record(&child_pid).unwrap().is_none());
    }

    #[test]
    fn malformed_reachable_record_aborts_collection() {
        let pool = pool_with(PoolConfig::default());
        let root = pool
            .root_or_create(|| new_object_ref(PoolArray::new()))
            .unwrap();
        pool.settle().unwrap();
        let root_pid = root.pid().unwrap();
        put_raw(&pool, root_pid.as_str(), "{not json");
        let (orphan, text) = orphan_record();
        put_raw(&pool, orphan.as_str(), &text);

        assert!(pool.promise_collect().is_err());
        assert!(pool.read_record(&orphan).unwrap().is_some());
    }
}
