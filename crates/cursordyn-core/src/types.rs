//! Core types: scalar key values, composite keys, and access-layer limits.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::IndexKeys;

/// Name of the index that addresses the table's primary key.
pub const DEFAULT_INDEX: &str = "default";

/// Page size used when a filter does not carry a limit.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Maximum number of keys in one store batch-get request (matching DynamoDB).
pub const BATCH_GET_MAX_KEYS: usize = 100;

/// Number of batch-get chunks allowed in flight at once.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 10;

/// Partition value plus optional sort value of an item's primary key.
pub type PrimaryKey = (KeyValue, Option<KeyValue>);

/// A scalar key attribute value.
///
/// Ordering puts all numbers before all strings; numbers compare numerically
/// and strings compare by UTF-8 bytes.
///
/// Numbers are held as `f64`, so integers are exact only up to 2^53 in
/// magnitude. Larger integral JSON numbers round to the nearest `f64` and two
/// such keys may compare equal; keep keys beyond that range as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    String(String),
    Number(f64),
}

impl KeyValue {
    /// Convert a JSON value into a key value. Only strings and numbers are scalars.
    pub fn from_json(val: &Value) -> Option<Self> {
        match val {
            Value::String(s) => Some(KeyValue::String(s.clone())),
            Value::Number(n) => n.as_f64().map(KeyValue::Number),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::Number(n) => number_to_json(*n),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::String(s) => Some(s),
            KeyValue::Number(_) => None,
        }
    }

    /// True when both values are the same scalar kind.
    pub fn same_kind(&self, other: &KeyValue) -> bool {
        matches!(
            (self, other),
            (KeyValue::String(_), KeyValue::String(_)) | (KeyValue::Number(_), KeyValue::Number(_))
        )
    }
}

/// Largest magnitude below which every integer is exactly representable as f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// `-0.0` is not an integer here: written as `0` it would read back as `0.0`,
/// which orders apart from `-0.0`.
fn as_integer(n: f64) -> Option<i64> {
    let negative_zero = n == 0.0 && n.is_sign_negative();
    (n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER && !negative_zero).then_some(n as i64)
}

/// Integral numbers go back out as JSON integers so `5` stays `5`, not `5.0`.
fn number_to_json(n: f64) -> Value {
    match as_integer(n) {
        Some(i) => Value::from(i),
        None => serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}

impl Serialize for KeyValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeyValue::String(s) => serializer.serialize_str(s),
            KeyValue::Number(n) => match as_integer(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::Number(a), KeyValue::Number(b)) => a.total_cmp(b),
            (KeyValue::String(a), KeyValue::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (KeyValue::Number(_), KeyValue::String(_)) => Ordering::Less,
            (KeyValue::String(_), KeyValue::Number(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::String(s) => f.write_str(s),
            KeyValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::String(s.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        KeyValue::String(s)
    }
}

impl From<f64> for KeyValue {
    fn from(n: f64) -> Self {
        KeyValue::Number(n)
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        KeyValue::Number(n as f64)
    }
}

impl From<i32> for KeyValue {
    fn from(n: i32) -> Self {
        KeyValue::Number(f64::from(n))
    }
}

impl From<u32> for KeyValue {
    fn from(n: u32) -> Self {
        KeyValue::Number(f64::from(n))
    }
}

/// A composite key: key-attribute name to scalar value.
///
/// Serves both as the store's continuation marker and as the payload carried
/// inside a [`Cursor`](crate::api::Cursor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(BTreeMap<String, KeyValue>);

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<KeyValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<KeyValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&KeyValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KeyValue)> {
        self.0.iter()
    }

    /// Extract the key of `item` under `keys`. Returns `None` if a key
    /// attribute is absent or not a scalar.
    pub fn from_item(item: &Value, keys: &IndexKeys) -> Option<Key> {
        let mut key = Key::new();
        for name in keys.attribute_names() {
            let val = KeyValue::from_json(item.get(name)?)?;
            key.insert(name, val);
        }
        Some(key)
    }

    /// The `(partition, sort)` pair under `keys`, or `None` if either key
    /// attribute is absent.
    pub fn primary_key(&self, keys: &IndexKeys) -> Option<PrimaryKey> {
        let pk = self.get(&keys.partition_key)?.clone();
        let sk = match &keys.sort_key {
            Some(name) => Some(self.get(name)?.clone()),
            None => None,
        };
        Some((pk, sk))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(name, val)| (name.clone(), val.to_json()))
                .collect(),
        )
    }
}
