//! Conversion between live field values and record JSON.
//!
//! Objects are written as reference markers (`{"*": "<puuid>"}`) and
//! resolved back through [`ObjectPool::object_for_pid`]. Referencing an
//! object the pool has never seen admits it and marks it dirty, which is how
//! a commit discovers newly attached subgraphs.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use opool_types::{marker_pid, ref_marker};

use crate::error::{PoolError, PoolResult};
use crate::pool::ObjectPool;
use crate::storable::{ObjectRef, ObjectRefExt};
use crate::value::StoreValue;

impl ObjectPool {
    /// Encode a live value for a record field.
    pub fn ref_value(&self, value: &StoreValue) -> PoolResult<Value> {
        Ok(match value {
            StoreValue::Null => Value::Null,
            StoreValue::Bool(b) => Value::Bool(*b),
            StoreValue::Number(n) => Value::Number(n.clone()),
            StoreValue::String(s) => Value::String(s.clone()),
            StoreValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.ref_value(item))
                    .collect::<PoolResult<_>>()?,
            ),
            StoreValue::Map(entries) => self.ref_entries(entries)?,
            StoreValue::Object(obj) => self.ref_object(obj)?,
            StoreValue::Pending(what) => {
                warn!(pending = %what, "unresolved value written as null");
                Value::Null
            }
        })
    }

    /// Encode an ordered map as a list of `[key, value]` pairs.
    pub fn ref_entries(&self, entries: &IndexMap<String, StoreValue>) -> PoolResult<Value> {
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            pairs.push(Value::Array(vec![
                Value::String(key.clone()),
                self.ref_value(value)?,
            ]));
        }
        Ok(Value::Array(pairs))
    }

    /// Encode an object reference, admitting the object if it is new.
    ///
    /// Objects that refuse storage are written as `null`.
    pub fn ref_object(&self, obj: &ObjectRef) -> PoolResult<Value> {
        let pid = obj.pid()?;
        if let Some(active) = self.active_object(&pid) {
            if !active.same_object(obj) {
                return Err(PoolError::InvariantViolation(format!(
                    "reference to {pid} names a different object than the active one"
                )));
            }
            return Ok(ref_marker(&pid));
        }

        if !self.add_active_object(obj)? {
            return Ok(Value::Null);
        }
        self.add_dirty_pid(&pid)?;
        Ok(ref_marker(&pid))
    }

    /// Decode a record field into a live value, resolving markers.
    ///
    /// A marker whose record is missing decodes as `Null`.
    pub fn unref_value(&self, value: &Value) -> PoolResult<StoreValue> {
        if let Some(literal) = StoreValue::from_literal(value) {
            return Ok(literal);
        }
        match value {
            Value::Array(items) => Ok(StoreValue::Array(
                items
                    .iter()
                    .map(|item| self.unref_value(item))
                    .collect::<PoolResult<_>>()?,
            )),
            Value::Object(fields) => {
                if let Some(pid) = marker_pid(value) {
                    return Ok(self
                        .object_for_pid(&pid)?
                        .map(StoreValue::Object)
                        .unwrap_or_default());
                }
                warn!(keys = fields.len(), "plain JSON object in record read as a map");
                let mut entries = IndexMap::with_capacity(fields.len());
                for (key, field) in fields {
                    entries.insert(key.clone(), self.unref_value(field)?);
                }
                Ok(StoreValue::Map(entries))
            }
            _ => Ok(StoreValue::Null),
        }
    }

    /// Decode a `[key, value]` entry list into an ordered map.
    ///
    /// `null` decodes as an empty map. Malformed entries are skipped.
    pub fn unref_entries(&self, value: &Value) -> PoolResult<IndexMap<String, StoreValue>> {
        let items = match value {
            Value::Null => return Ok(IndexMap::new()),
            Value::Array(items) => items,
            other => {
                return Err(PoolError::Serialization(format!(
                    "expected a list of [key, value] entries, found {other}"
                )))
            }
        };

        let mut entries = IndexMap::with_capacity(items.len());
        for item in items {
            match item.as_array().map(Vec::as_slice) {
                Some([Value::String(key), field]) => {
                    entries.insert(key.clone(), self.unref_value(field)?);
                }
                _ => warn!(entry = %item, "malformed map entry skipped"),
            }
        }
        Ok(entries)
    }

    /// Decode a field expected to hold a single reference.
    pub fn unref_object(&self, value: &Value) -> PoolResult<Option<ObjectRef>> {
        match marker_pid(value) {
            Some(pid) => self.object_for_pid(&pid),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::PoolArray;
    use crate::config::PoolConfig;
    use crate::registry::TypeRegistry;
    use crate::storable::new_object_ref;
    use opool_store::InMemoryRecordStore;
    use opool_types::Puuid;
    use serde_json::json;

    fn open_pool() -> ObjectPool {
        let pool = ObjectPool::new(
            Box::new(InMemoryRecordStore::new()),
            TypeRegistry::with_builtins(),
            PoolConfig::default(),
        )
        .unwrap();
        pool.open().unwrap();
        pool
    }

    #[test]
    fn literals_pass_through() {
        let pool = open_pool();
        assert_eq!(pool.ref_value(&StoreValue::from(3i64)).unwrap(), json!(3));
        assert_eq!(pool.ref_value(&StoreValue::from("x")).unwrap(), json!("x"));
        assert_eq!(pool.unref_value(&json!(true)).unwrap(), StoreValue::from(true));
        assert_eq!(pool.unref_value(&json!(null)).unwrap(), StoreValue::Null);
    }

    #[test]
    fn maps_encode_as_ordered_entry_lists() {
        let pool = open_pool();
        let mut entries = IndexMap::new();
        entries.insert("z".to_string(), StoreValue::from(1i64));
        entries.insert("a".to_string(), StoreValue::from(2i64));

        let encoded = pool.ref_value(&StoreValue::Map(entries.clone())).unwrap();
        assert_eq!(encoded, json!([["z", 1], ["a", 2]]));
        assert_eq!(pool.unref_entries(&encoded).unwrap(), entries);
    }

    #[test]
    fn unknown_object_is_admitted_and_dirtied() {
        let pool = open_pool();
        let obj = new_object_ref(PoolArray::new());
        let pid = obj.pid().unwrap();

        let encoded = pool.ref_value(&StoreValue::Object(obj)).unwrap();
        assert_eq!(encoded, json!({"*": pid.as_str()}));
        assert!(pool.is_active(&pid));
        assert!(pool.is_dirty(&pid));
    }

    #[test]
    fn pending_values_are_written_as_null() {
        let pool = open_pool();
        let encoded = pool
            .ref_value(&StoreValue::Array(vec![
                StoreValue::from(1i64),
                StoreValue::Pending("thumbnail".into()),
            ]))
            .unwrap();
        assert_eq!(encoded, json!([1, null]));
    }

    #[test]
    fn dangling_marker_decodes_as_null() {
        let pool = open_pool();
        let marker = json!({"*": Puuid::generate().as_str()});
        assert_eq!(pool.unref_value(&marker).unwrap(), StoreValue::Null);
        assert!(pool.unref_object(&marker).unwrap().is_none());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let pool = open_pool();
        let decoded = pool
            .unref_entries(&json!([["ok", 1], ["missing value"], [3, 4], "junk"]))
            .unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["ok"], StoreValue::from(1i64));

        assert!(pool.unref_entries(&json!(null)).unwrap().is_empty());
        assert!(matches!(
            pool.unref_entries(&json!("nope")),
            Err(PoolError::Serialization(_))
        ));
    }

    #[test]
    fn plain_objects_decode_as_maps() {
        let pool = open_pool();
        let decoded = pool.unref_value(&json!({"a": 1, "b": 2})).unwrap();
        let map = decoded.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["b"], StoreValue::from(2i64));
    }
}
