//! Canonical configuration trees.
//!
//! A tree is a `serde_json::Value`: scalars, ordered sequences, and mappings
//! whose keys keep their insertion order. Normalized trees never hold dotted
//! keys; `"a.b": 1` is always stored as `{"a": {"b": 1}}`.
//!
//! Equality between trees is plain `Value` equality, which ignores mapping key
//! order, so it doubles as the change detector for rebuilds.

mod merge;

pub use merge::{deep_merge, deep_merge_all};
pub(crate) use merge::merge_into;

use crate::alias::AliasTable;
use serde_json::{Map, Value};

/// Separator between segments of a canonical key.
pub const KEY_SEPARATOR: char = '.';

/// Look up a dotted key in a tree.
///
/// Returns `None` as soon as a segment is missing or a non-mapping value is
/// reached before the last segment.
pub fn get_path<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return Some(tree);
    }
    key.split(KEY_SEPARATOR)
        .try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

/// Assign `value` at a dotted key, creating intermediate mappings.
///
/// A non-mapping value standing in the way is replaced by a mapping.
pub fn set_path(tree: &mut Map<String, Value>, key: &str, value: Value) {
    let mut segments: Vec<&str> = key
        .split(KEY_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut node = tree;
    for segment in segments {
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => unreachable!("child was just made an object"),
        };
    }

    match (node.get_mut(last), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            merge_into(existing, &incoming);
        }
        (_, value) => {
            node.insert(last.to_string(), value);
        }
    }
}

/// Build a tree holding a single value at a dotted key.
pub fn from_path(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    set_path(&mut map, key, value);
    Value::Object(map)
}

/// Normalize a parsed tree: expand dotted keys and resolve aliases.
///
/// Each key's full dotted path is resolved through `aliases` before it is
/// placed, so `{"db_host": "x"}` with `db_host -> database.host` becomes
/// `{"database": {"host": "x"}}`. Mappings inside sequences are expanded as
/// independent trees without alias resolution.
pub fn normalize(raw: &Value, aliases: &AliasTable) -> Value {
    match raw {
        Value::Object(map) => {
            let mut out = Map::new();
            normalize_into(&mut out, "", map, aliases);
            Value::Object(out)
        }
        other => normalize_value(other),
    }
}

fn normalize_into(
    out: &mut Map<String, Value>,
    prefix: &str,
    map: &Map<String, Value>,
    aliases: &AliasTable,
) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{KEY_SEPARATOR}{key}")
        };
        let canonical = aliases.resolve(&full);
        match value {
            Value::Object(child) => {
                set_path(out, canonical, Value::Object(Map::new()));
                normalize_into(out, canonical, child, aliases);
            }
            other => set_path(out, canonical, normalize_value(other)),
        }
    }
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| normalize(item, &AliasTable::default()))
                .collect(),
        ),
        Value::Object(_) => normalize(value, &AliasTable::default()),
        other => other.clone(),
    }
}

/// Collect every leaf key of a tree in dotted form.
///
/// Sequences and empty mappings count as leaves.
pub fn leaf_keys(tree: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    if let Value::Object(map) = tree {
        collect_leaf_keys(map, "", &mut keys);
    }
    keys
}

fn collect_leaf_keys(map: &Map<String, Value>, prefix: &str, keys: &mut Vec<String>) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{KEY_SEPARATOR}{key}")
        };
        match value {
            Value::Object(child) if !child.is_empty() => collect_leaf_keys(child, &full, keys),
            _ => keys.push(full),
        }
    }
}

/// Short human description of a value's type, used in error messages.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
