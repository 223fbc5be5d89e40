//! Point-in-time view of the live table with typed accessors.
//!
//! A snapshot pins one merged table, so a series of reads through the same
//! snapshot is always consistent even while background sources refresh.

use crate::alias::AliasTable;
use crate::coerce;
use crate::error::{FigiError, Result};
use crate::tree::{self, describe};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::ops::Index;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// An immutable merged table plus the aliases that were active when it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    table: Arc<Value>,
    aliases: Arc<AliasTable>,
}

impl Snapshot {
    pub(crate) fn new(table: Arc<Value>, aliases: Arc<AliasTable>) -> Self {
        Self { table, aliases }
    }

    /// The whole merged table.
    pub fn table(&self) -> &Value {
        &self.table
    }

    /// Look up a key, resolving aliases first. `null` counts as present.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        tree::get_path(&self.table, self.aliases.resolve(key))
    }

    /// Owned copy of the value at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key).cloned()
    }

    /// Whether a non-null value exists at `key`.
    pub fn is_set(&self, key: &str) -> bool {
        self.present(key).is_some()
    }

    /// Every leaf key in dotted form.
    pub fn keys(&self) -> Vec<String> {
        tree::leaf_keys(&self.table)
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.lookup(key).filter(|value| !value.is_null())
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &Value) -> FigiError {
        FigiError::type_mismatch(self.aliases.resolve(key), expected, describe(found))
    }

    pub fn get_string(&self, key: &str, default: &str) -> Result<String> {
        match self.present(key) {
            None => Ok(default.to_string()),
            Some(value) => coerce::as_string(value)
                .ok_or_else(|| self.mismatch(key, "string", value)),
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        match self.present(key) {
            None => Ok(default),
            Some(value) => coerce::as_i64(value)
                .ok_or_else(|| self.mismatch(key, "integer", value)),
        }
    }

    pub fn get_float(&self, key: &str, default: f64) -> Result<f64> {
        match self.present(key) {
            None => Ok(default),
            Some(value) => coerce::as_f64(value)
                .ok_or_else(|| self.mismatch(key, "float", value)),
        }
    }

    /// Booleans, or `"true"`/`"false"` in any case with surrounding
    /// whitespace ignored. Anything else is a type error.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.present(key) {
            None => Ok(default),
            Some(value) => coerce::as_bool(value)
                .ok_or_else(|| self.mismatch(key, "boolean", value)),
        }
    }

    pub fn get_array(&self, key: &str, default: Vec<Value>) -> Result<Vec<Value>> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(value) => Err(self.mismatch(key, "array", value)),
        }
    }

    pub fn get_hash(&self, key: &str, default: Map<String, Value>) -> Result<Map<String, Value>> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(value) => Err(self.mismatch(key, "object", value)),
        }
    }

    /// Deserialize the value at `key` into `T`. Absent keys yield `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.present(key) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            FigiError::type_mismatch(
                self.aliases.resolve(key),
                std::any::type_name::<T>(),
                format!("{} ({})", describe(value), e),
            )
        })
    }
}

impl Index<&str> for Snapshot {
    type Output = Value;

    /// Index by dotted key; missing keys read as `Value::Null`.
    fn index(&self, key: &str) -> &Value {
        self.lookup(key).unwrap_or(&NULL)
    }
}
