//! Deep merge for configuration trees.
//!
//! Implements field-by-field merging where the overlay wins at conflicting leaves.
//! Arrays are replaced entirely, not concatenated.

use serde_json::{Map, Value};

/// Deep merge two trees, with `overlay` taking precedence over `base`.
///
/// - Objects are merged recursively: keys in overlay override keys in base
/// - Arrays, strings, numbers, booleans, nulls are replaced entirely
///
/// Neither input is modified, so source fragments can be re-merged at any time.
///
/// # Example
/// ```
/// use serde_json::json;
/// use figi::tree::deep_merge;
///
/// let base = json!({
///     "server": { "port": 8080, "host": "localhost" },
///     "features": ["a", "b"]
/// });
/// let overlay = json!({
///     "server": { "port": 9000 },
///     "features": ["c"]
/// });
/// let result = deep_merge(&base, &overlay);
/// assert_eq!(
///     result,
///     json!({ "server": { "port": 9000, "host": "localhost" }, "features": ["c"] })
/// );
/// ```
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            merge_into(&mut merged, overlay_map);
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Merge `overlay` into an owned map in place.
pub(crate) fn merge_into(target: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, overlay_value) in overlay {
        match (target.get_mut(key), overlay_value) {
            (Some(Value::Object(target_child)), Value::Object(overlay_child)) => {
                merge_into(target_child, overlay_child);
            }
            _ => {
                target.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

/// Merge multiple trees in order, with later trees taking precedence.
///
/// Folding starts from an empty object, so merging nothing yields `{}`.
pub fn deep_merge_all<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
    values
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, value| match (acc, value) {
            (Value::Object(mut merged), Value::Object(overlay)) => {
                merge_into(&mut merged, overlay);
                Value::Object(merged)
            }
            (_, other) => other.clone(),
        })
}
