//! Type-name to factory registry.
//!
//! Records carry the type name of the object they were written from. At load
//! time the pool looks that name up here to find a factory that builds an
//! empty instance. Types that were renamed keep loading through an explicit
//! legacy-name table instead of by convention.

use std::collections::HashMap;
use std::fmt;

use opool_types::Record;

use crate::collections::{PoolArray, PoolMap};
use crate::error::PoolResult;
use crate::pool::ObjectPool;
use crate::storable::{new_object_ref, ObjectRef, StorableType};

/// Builds an empty object from a record; `Ok(None)` skips the record.
pub type Factory = Box<dyn Fn(&Record, &ObjectPool) -> PoolResult<Option<ObjectRef>>>;

/// Maximum legacy-name hops followed before giving up on a chain.
const MAX_ALIAS_HOPS: usize = 8;

/// Registry of storable types known to a pool.
#[derive(Default)]
pub struct TypeRegistry {
    factories: HashMap<String, Factory>,
    legacy_names: HashMap<String, String>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in collection types (`Array`, `Map`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<PoolArray>().register::<PoolMap>();
        registry
    }

    /// Register `T` under `T::TYPE_NAME`, replacing any previous factory.
    pub fn register<T: StorableType>(&mut self) -> &mut Self {
        self.register_factory(T::TYPE_NAME, |record, pool| {
            Ok(T::instance_from_record(record, pool)?.map(new_object_ref))
        })
    }

    /// Register a hand-written factory under `type_name`.
    pub fn register_factory<F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Record, &ObjectPool) -> PoolResult<Option<ObjectRef>> + 'static,
    {
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        self
    }

    /// Load records written under `old_name` with the factory of `new_name`.
    pub fn add_legacy_name(&mut self, old_name: &str, new_name: &str) -> &mut Self {
        self.legacy_names
            .insert(old_name.to_string(), new_name.to_string());
        self
    }

    /// Follow the legacy-name table from `type_name` to its current name.
    pub fn resolve_name<'a>(&'a self, type_name: &'a str) -> &'a str {
        let mut name = type_name;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.legacy_names.get(name) {
                Some(next) => name = next.as_str(),
                None => break,
            }
        }
        name
    }

    /// Factory for `type_name` after legacy-name resolution.
    pub fn factory_for(&self, type_name: &str) -> Option<&Factory> {
        self.factories.get(self.resolve_name(type_name))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factory_for(type_name).is_some()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .field("legacy_names", &self.legacy_names.len())
            .finish()
    }
}
