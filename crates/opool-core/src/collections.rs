//! Built-in storable collections.
//!
//! [`PoolArray`] and [`PoolMap`] hold [`StoreValue`]s, so they can nest and
//! reference other objects. Every mutator reports to the pool, which makes
//! them the simplest way to build an observed object graph.

use std::any::Any;

use indexmap::IndexMap;
use serde_json::Value;

use opool_types::{Puuid, Record};

use crate::error::{PoolError, PoolResult};
use crate::pool::ObjectPool;
use crate::storable::{MutationObserver, Storable, StorableType};
use crate::value::StoreValue;

/// An ordered list of values, persisted as type `Array`.
#[derive(Debug)]
pub struct PoolArray {
    puuid: Puuid,
    values: Vec<StoreValue>,
    observer: Option<MutationObserver>,
}

impl PoolArray {
    pub fn new() -> Self {
        Self::with_puuid(Puuid::generate())
    }

    pub fn with_puuid(puuid: Puuid) -> Self {
        Self {
            puuid,
            values: Vec::new(),
            observer: None,
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = StoreValue>) -> Self {
        let mut array = Self::new();
        array.values = values.into_iter().collect();
        array
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StoreValue> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[StoreValue] {
        &self.values
    }

    pub fn push(&mut self, value: impl Into<StoreValue>) {
        self.values.push(value.into());
        self.did_mutate();
    }

    /// Replace the value at `index`. Returns the old value, or `None` if
    /// `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: impl Into<StoreValue>) -> Option<StoreValue> {
        let slot = self.values.get_mut(index)?;
        let old = std::mem::replace(slot, value.into());
        self.did_mutate();
        Some(old)
    }

    pub fn remove(&mut self, index: usize) -> Option<StoreValue> {
        if index >= self.values.len() {
            return None;
        }
        let old = self.values.remove(index);
        self.did_mutate();
        Some(old)
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.values.clear();
            self.did_mutate();
        }
    }

    fn did_mutate(&self) {
        if let Some(observer) = &self.observer {
            observer.did_mutate();
        }
    }
}

impl Default for PoolArray {
    fn default() -> Self {
        Self::new()
    }
}

impl Storable for PoolArray {
    fn puuid(&self) -> &Puuid {
        &self.puuid
    }

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn record_for_store(&self, pool: &ObjectPool) -> PoolResult<Record> {
        let mut record = Record::new(self.puuid.clone(), Self::TYPE_NAME);
        let values = self
            .values
            .iter()
            .map(|value| pool.ref_value(value))
            .collect::<PoolResult<Vec<_>>>()?;
        record.set("values", Value::Array(values))?;
        Ok(record)
    }

    fn load_from_record(&mut self, record: &Record, pool: &ObjectPool) -> PoolResult<()> {
        self.values = match record.get("values") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| pool.unref_value(item))
                .collect::<PoolResult<_>>()?,
            Some(other) => {
                return Err(PoolError::Serialization(format!(
                    "Array {} has non-list values: {other}",
                    self.puuid
                )))
            }
        };
        Ok(())
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

impl StorableType for PoolArray {
    const TYPE_NAME: &'static str = "Array";

    fn instance_from_record(record: &Record, _pool: &ObjectPool) -> PoolResult<Option<Self>> {
        Ok(Some(Self::with_puuid(record.id.clone())))
    }
}

/// An insertion-ordered string-keyed map, persisted as type `Map` with its
/// entries as a list of `[key, value]` pairs.
#[derive(Debug)]
pub struct PoolMap {
    puuid: Puuid,
    entries: IndexMap<String, StoreValue>,
    observer: Option<MutationObserver>,
}

impl PoolMap {
    pub fn new() -> Self {
        Self::with_puuid(Puuid::generate())
    }

    pub fn with_puuid(puuid: Puuid) -> Self {
        Self {
            puuid,
            entries: IndexMap::new(),
            observer: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&StoreValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace; a replaced key keeps its position.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<StoreValue>,
    ) -> Option<StoreValue> {
        let old = self.entries.insert(key.into(), value.into());
        self.did_mutate();
        old
    }

    /// Remove `key`, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<StoreValue> {
        let old = self.entries.shift_remove(key)?;
        self.did_mutate();
        Some(old)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoreValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn did_mutate(&self) {
        if let Some(observer) = &self.observer {
            observer.did_mutate();
        }
    }
}

impl Default for PoolMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Storable for PoolMap {
    fn puuid(&self) -> &Puuid {
        &self.puuid
    }

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn record_for_store(&self, pool: &ObjectPool) -> PoolResult<Record> {
        let mut record = Record::new(self.puuid.clone(), Self::TYPE_NAME);
        record.set("entries", pool.ref_entries(&self.entries)?)?;
        Ok(record)
    }

    fn load_from_record(&mut self, record: &Record, pool: &ObjectPool) -> PoolResult<()> {
        self.entries = pool.unref_entries(record.get("entries").unwrap_or(&Value::Null))?;
        Ok(())
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

impl StorableType for PoolMap {
    const TYPE_NAME: &'static str = "Map";

    fn instance_from_record(record: &Record, _pool: &ObjectPool) -> PoolResult<Option<Self>> {
        Ok(Some(Self::with_puuid(record.id.clone())))
    }
}
