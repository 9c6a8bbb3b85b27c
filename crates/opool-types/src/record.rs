//! The persisted record model.
//!
//! A [`Record`] is what one storable object looks like inside the record
//! store: its puuid, its registered type name, and a flat set of named
//! fields. Field values are plain JSON with two conventions layered on top:
//!
//! - a reference to another object is a marker object `{"*": "<puuid>"}`;
//! - a map is an ordered list of `[key, value]` entry pairs, never a native
//!   JSON object.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::puuid::Puuid;

/// Reserved store key whose value is the root object's puuid.
pub const ROOT_KEY: &str = "root";

/// The single key of a reference marker object.
pub const REF_KEY: &str = "*";

/// Serialized form of one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Puuid,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with no fields.
    pub fn new(id: Puuid, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            fields: Map::new(),
        }
    }

    /// Set a field. `id` and `type` are reserved and rejected.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), TypeError> {
        if name == "id" || name == "type" {
            return Err(TypeError::MalformedRecord(format!(
                "field name {name:?} is reserved"
            )));
        }
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String field accessor. Returns `None` if absent or not a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Encode to the JSON text written into the store.
    pub fn to_json(&self) -> Result<String, TypeError> {
        serde_json::to_string(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode JSON text read back from the store.
    pub fn from_json(text: &str) -> Result<Self, TypeError> {
        serde_json::from_str(text).map_err(|e| TypeError::MalformedRecord(e.to_string()))
    }

    /// Every puuid referenced by a marker anywhere in this record's fields.
    pub fn ref_pids(&self) -> BTreeSet<Puuid> {
        let mut pids = BTreeSet::new();
        for value in self.fields.values() {
            collect_ref_pids(value, &mut pids);
        }
        pids
    }
}

/// Build the reference marker `{"*": pid}`.
pub fn ref_marker(pid: &Puuid) -> Value {
    let mut marker = Map::with_capacity(1);
    marker.insert(REF_KEY.to_string(), Value::String(pid.to_string()));
    Value::Object(marker)
}

/// If `value` is a reference marker, return the puuid it points at.
pub fn marker_pid(value: &Value) -> Option<Puuid> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let pid = obj.get(REF_KEY)?.as_str()?;
    Puuid::parse(pid).ok()
}

/// Walk a JSON value and collect the puuid of every reference marker in it,
/// however deeply it is nested inside arrays, entry lists or objects.
pub fn collect_ref_pids(value: &Value, pids: &mut BTreeSet<Puuid>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_ref_pids(item, pids);
            }
        }
        Value::Object(obj) => {
            if let Some(pid) = marker_pid(value) {
                pids.insert(pid);
                return;
            }
            for item in obj.values() {
                collect_ref_pids(item, pids);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn pid(s: &str) -> Puuid {
        Puuid::parse(s).unwrap()
    }

    #[test]
    fn record_wire_shape() {
        let mut record = Record::new(pid("a1"), "Node");
        record.set("name", json!("alpha")).unwrap();
        record.set("next", ref_marker(&pid("b2"))).unwrap();

        let text = record.to_json().unwrap();
        assert_eq!(
            text,
            r#"{"id":"a1","type":"Node","name":"alpha","next":{"*":"b2"}}"#
        );
        assert_eq!(Record::from_json(&text).unwrap(), record);
    }

    #[test]
    fn reserved_field_names_are_rejected() {
        let mut record = Record::new(pid("a1"), "Node");
        assert!(record.set("id", json!("x")).is_err());
        assert!(record.set("type", json!("x")).is_err());
        assert!(record.fields.is_empty());
    }

    #[test]
    fn from_json_requires_id_and_type() {
        assert!(Record::from_json(r#"{"type":"Node"}"#).is_err());
        assert!(Record::from_json(r#"{"id":"a1"}"#).is_err());
        assert!(Record::from_json("not json").is_err());
    }

    #[test]
    fn marker_pid_only_matches_single_key_objects() {
        assert_eq!(marker_pid(&json!({"*": "x1"})), Some(pid("x1")));
        assert_eq!(marker_pid(&json!({"*": "x1", "extra": 1})), None);
        assert_eq!(marker_pid(&json!({"*": 5})), None);
        assert_eq!(marker_pid(&json!({"*": "root"})), None);
        assert_eq!(marker_pid(&json!("x1")), None);
    }

    #[test]
    fn ref_pids_finds_markers_inside_entry_lists() {
        let mut record = Record::new(pid("m1"), "Map");
        record
            .set(
                "entries",
                json!([["a", {"*": "c1"}], ["b", [1, {"*": "c2"}]], ["c", 3]]),
            )
            .unwrap();
        record.set("owner", json!({"*": "c3"})).unwrap();

        let pids: Vec<String> = record.ref_pids().into_iter().map(String::from).collect();
        assert_eq!(pids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn literals_hold_no_references() {
        let mut pids = BTreeSet::new();
        collect_ref_pids(&json!({"a": 1, "b": [true, null, "s"]}), &mut pids);
        assert!(pids.is_empty());
    }

    fn nest(value: Value, depth: usize) -> Value {
        (0..depth).fold(value, |inner, i| {
            if i % 2 == 0 {
                json!([0, inner])
            } else {
                json!([["k", inner]])
            }
        })
    }

    proptest! {
        #[test]
        fn markers_are_found_at_any_depth(
            names in proptest::collection::btree_set("[a-z][a-z0-9]{0,7}", 1..8),
            depth in 0usize..6,
        ) {
            let expected: BTreeSet<Puuid> = names
                .iter()
                .filter_map(|n| Puuid::parse(n).ok())
                .collect();
            let items: Vec<Value> = expected.iter().map(|p| nest(ref_marker(p), depth)).collect();
            let mut found = BTreeSet::new();
            collect_ref_pids(&Value::Array(items), &mut found);
            prop_assert_eq!(found, expected);
        }
    }
}
