//! Attribute projections for batch lookups.
//!
//! Paths are dot-separated (`address.city`). The access layer always widens a
//! caller's projection with the primary-key attributes so returned items can be
//! matched back to the requested keys.

use serde_json::{Map, Value};

use crate::config::IndexKeys;

/// `fields` plus any primary-key attribute it omits. Order of `fields` is kept.
pub fn augment_projection(fields: &[String], keys: &IndexKeys) -> Vec<String> {
    let mut out = fields.to_vec();
    for name in keys.attribute_names() {
        if !out.iter().any(|f| f == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Keep only `paths` of `doc`. An empty projection returns the whole document.
pub fn apply_projection(doc: &Value, paths: &[String]) -> Value {
    if paths.is_empty() {
        return doc.clone();
    }

    let mut result = Map::new();
    for path in paths {
        if let Some(val) = resolve_path(doc, path) {
            set_nested_path(&mut result, path, val.clone());
        }
    }
    Value::Object(result)
}

fn resolve_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

/// Set a value at a dot-separated path, creating intermediate objects.
fn set_nested_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let slot = current
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
}
