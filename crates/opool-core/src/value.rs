use std::fmt;

use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::storable::{ObjectRef, ObjectRefExt};

/// A live field value, as an object holds it in memory.
///
/// [`ObjectPool::ref_value`](crate::ObjectPool::ref_value) turns a
/// `StoreValue` into record JSON and
/// [`ObjectPool::unref_value`](crate::ObjectPool::unref_value) turns it back.
/// Objects become reference markers, maps become ordered entry lists.
#[derive(Clone, Default)]
pub enum StoreValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<StoreValue>),
    /// Insertion-ordered map; stored as a list of `[key, value]` pairs.
    Map(IndexMap<String, StoreValue>),
    Object(ObjectRef),
    /// A value still being computed. It cannot be persisted and is written
    /// as `null` with a warning.
    Pending(String),
}

impl StoreValue {
    /// Convert a JSON literal. Arrays and objects are not literals.
    pub fn from_literal(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[StoreValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, StoreValue>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for StoreValue {
    /// Literals compare by value, objects by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.same_object(b),
            (Self::Pending(a), Self::Pending(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => f.debug_map().entries(entries).finish(),
            Self::Object(obj) => match obj.try_borrow() {
                Ok(o) => write!(f, "Object({} {})", o.type_name(), o.puuid().short()),
                Err(_) => f.write_str("Object(<busy>)"),
            },
            Self::Pending(what) => write!(f, "Pending({what})"),
        }
    }
}

impl From<bool> for StoreValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for StoreValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for StoreValue {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for StoreValue {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(Self::Number).unwrap_or(Self::Null)
    }
}

impl From<&str> for StoreValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObjectRef> for StoreValue {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<Vec<StoreValue>> for StoreValue {
    fn from(items: Vec<StoreValue>) -> Self {
        Self::Array(items)
    }
}

impl<T: Into<StoreValue>> From<Option<T>> for StoreValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}
