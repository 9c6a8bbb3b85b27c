#![allow(dead_code)]

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use opool_core::{
    new_object_ref, MutationObserver, ObjectPool, ObjectRef, ObjectRefExt, PoolConfig,
    PoolResult, Puuid, Record, Storable, StorableType, TypeRegistry,
};
use opool_store::RecordStore;

/// Linked-list style test object with one strong and one lazy reference.
pub struct Node {
    puuid: Puuid,
    pub name: String,
    pub next: Option<ObjectRef>,
    pub lazy: Option<Puuid>,
    storable: bool,
    instance: bool,
    pub did_load_calls: usize,
    pub did_init_calls: usize,
    /// Name of `next` as seen from `did_load_from_store`.
    pub next_name_at_load: Option<String>,
    observer: Option<MutationObserver>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self::with_puuid(Puuid::generate(), name)
    }

    pub fn with_puuid(puuid: Puuid, name: &str) -> Self {
        Self {
            puuid,
            name: name.to_string(),
            next: None,
            lazy: None,
            storable: true,
            instance: true,
            did_load_calls: 0,
            did_init_calls: 0,
            next_name_at_load: None,
            observer: None,
        }
    }

    /// A node that refuses storage.
    pub fn transient(name: &str) -> Self {
        Self {
            storable: false,
            ..Self::new(name)
        }
    }

    /// A prototype value that is not an instance.
    pub fn template(name: &str) -> Self {
        Self {
            instance: false,
            ..Self::new(name)
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.did_mutate();
    }

    pub fn set_next(&mut self, next: Option<ObjectRef>) {
        self.next = next;
        self.did_mutate();
    }

    pub fn set_lazy(&mut self, lazy: Option<Puuid>) {
        self.lazy = lazy;
        self.did_mutate();
    }

    fn did_mutate(&self) {
        if let Some(observer) = &self.observer {
            observer.did_mutate();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let next = self.next.as_ref().map(|next| {
            next.try_borrow()
                .map(|n| n.puuid().short().to_string())
                .ok()
        });
        f.debug_struct("Node")
            .field("puuid", &self.puuid)
            .field("name", &self.name)
            .field("next", &next)
            .field("lazy", &self.lazy)
            .field("did_load_calls", &self.did_load_calls)
            .field("did_init_calls", &self.did_init_calls)
            .finish()
    }
}

impl Storable for Node {
    fn puuid(&self) -> &Puuid {
        &self.puuid
    }

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn should_store(&self) -> bool {
        self.storable
    }

    fn is_instance(&self) -> bool {
        self.instance
    }

    fn record_for_store(&self, pool: &ObjectPool) -> PoolResult<Record> {
        let mut record = Record::new(self.puuid.clone(), Self::TYPE_NAME);
        record.set("name", Value::String(self.name.clone()))?;
        let next = match &self.next {
            Some(next) => pool.ref_object(next)?,
            None => Value::Null,
        };
        record.set("next", next)?;
        let lazy = match &self.lazy {
            Some(pid) => Value::String(pid.to_string()),
            None => Value::Null,
        };
        record.set("lazy", lazy)?;
        Ok(record)
    }

    fn load_from_record(&mut self, record: &Record, pool: &ObjectPool) -> PoolResult<()> {
        self.name = record.get_str("name").unwrap_or_default().to_string();
        self.next = match record.get("next") {
            Some(value) => pool.unref_object(value)?,
            None => None,
        };
        self.lazy = record.get_str("lazy").map(Puuid::parse).transpose()?;
        // Routed through the observer; must not dirty a loading object.
        self.did_mutate();
        Ok(())
    }

    fn did_init_from_record(&mut self, _pool: &ObjectPool) {
        self.did_init_calls += 1;
    }

    fn did_load_from_store(&mut self, _pool: &ObjectPool) {
        self.did_load_calls += 1;
        self.next_name_at_load = self
            .next
            .as_ref()
            .and_then(|next| next.with::<Node, _>(|n| n.name.clone()));
    }

    fn lazy_pids(&self, pids: &mut BTreeSet<Puuid>) {
        if let Some(pid) = &self.lazy {
            pids.insert(pid.clone());
        }
    }

    fn set_observer(&mut self, observer: Option<MutationObserver>) {
        self.observer = observer;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl StorableType for Node {
    const TYPE_NAME: &'static str = "Node";

    fn instance_from_record(record: &Record, _pool: &ObjectPool) -> PoolResult<Option<Self>> {
        Ok(Some(Self::with_puuid(record.id.clone(), "")))
    }
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_builtins();
    registry.register::<Node>();
    registry
}

pub fn open_pool(store: Box<dyn RecordStore>) -> ObjectPool {
    open_pool_with(store, PoolConfig::default())
}

pub fn open_pool_with(store: Box<dyn RecordStore>, config: PoolConfig) -> ObjectPool {
    let pool = ObjectPool::new(store, registry(), config).unwrap();
    pool.open().unwrap();
    pool
}

/// Close `pool` and open a fresh pool over the same store.
pub fn reopen(pool: &ObjectPool) -> ObjectPool {
    let store = pool.close().unwrap();
    open_pool(store)
}

pub fn node(name: &str) -> ObjectRef {
    new_object_ref(Node::new(name))
}

pub fn name_of(obj: &ObjectRef) -> String {
    obj.with::<Node, _>(|n| n.name.clone()).unwrap()
}

pub fn next_of(obj: &ObjectRef) -> Option<ObjectRef> {
    obj.with::<Node, _>(|n| n.next.clone()).unwrap()
}

pub fn link(from: &ObjectRef, to: &ObjectRef) {
    from.with_mut::<Node, _>(|n| n.set_next(Some(to.clone())))
        .unwrap();
}

pub fn stored_keys(pool: &ObjectPool) -> usize {
    pool.record_count().unwrap()
}
