//! Environment variable binding.
//!
//! Turns an environment snapshot into a configuration tree. Two mechanisms
//! feed the tree:
//!
//! - **Explicit bindings** map one exact variable name to a canonical key,
//!   optionally through a transformer. They always win for that variable.
//! - **Auto-binding** applies to variables starting with `PREFIX + SEPARATOR`:
//!   the prefix is stripped, the rest is split on the separator, and the
//!   formatter turns the segments into a dotted key.
//!   With prefix `FIGI` and separator `_`, `FIGI_SERVICE_ENABLED=true`
//!   becomes `{service: {enabled: true}}`.
//!
//! Without a prefix only explicit bindings apply.

use crate::coerce::coerce_str;
use crate::tree::{KEY_SEPARATOR, set_path};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default separator between prefix and name segments.
pub const DEFAULT_SEPARATOR: &str = "_";

/// Turns name segments into a canonical dotted key.
pub type KeyFormatter = Arc<dyn Fn(&[&str]) -> String + Send + Sync>;

/// Turns a raw variable value into a tree value.
pub type Transformer = Arc<dyn Fn(&str) -> Value + Send + Sync>;

/// Keep the variables whose name and value are both valid UTF-8. The rest
/// cannot name a config key and are skipped.
pub fn utf8_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (name, _) => {
                debug!(var = ?name, "Skipped non-UTF-8 environment variable");
                None
            }
        })
        .collect()
}

/// The default formatter: lowercase every segment and join with `.`.
pub fn default_formatter(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| segment.to_lowercase())
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

/// An explicit variable-to-key binding.
#[derive(Clone)]
pub struct EnvBinding {
    /// Canonical key the variable feeds.
    pub key: String,
    /// Optional transformer; default scalar coercion applies when absent.
    pub transformer: Option<Transformer>,
}

impl fmt::Debug for EnvBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvBinding")
            .field("key", &self.key)
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

/// Environment binder state.
#[derive(Clone)]
pub struct EnvBinder {
    prefix: Option<String>,
    separator: String,
    formatter: KeyFormatter,
    bindings: HashMap<String, EnvBinding>,
}

impl Default for EnvBinder {
    fn default() -> Self {
        Self {
            prefix: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            formatter: Arc::new(default_formatter),
            bindings: HashMap::new(),
        }
    }
}

impl fmt::Debug for EnvBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvBinder")
            .field("prefix", &self.prefix)
            .field("separator", &self.separator)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl EnvBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable auto-binding for variables starting with `prefix`.
    /// An empty prefix disables auto-binding.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.prefix = if prefix.is_empty() { None } else { Some(prefix) };
    }

    /// Set the segment separator. An empty separator falls back to the default.
    pub fn set_separator(&mut self, separator: impl Into<String>) {
        let separator = separator.into();
        self.separator = if separator.is_empty() {
            DEFAULT_SEPARATOR.to_string()
        } else {
            separator
        };
    }

    pub fn set_formatter(&mut self, formatter: impl Fn(&[&str]) -> String + Send + Sync + 'static) {
        self.formatter = Arc::new(formatter);
    }

    /// Bind `var` to `key` using default coercion.
    pub fn bind(&mut self, var: impl Into<String>, key: impl Into<String>) {
        self.bindings.insert(
            var.into(),
            EnvBinding {
                key: key.into(),
                transformer: None,
            },
        );
    }

    /// Bind `var` to `key` through a transformer.
    pub fn bind_with(
        &mut self,
        var: impl Into<String>,
        key: impl Into<String>,
        transformer: impl Fn(&str) -> Value + Send + Sync + 'static,
    ) {
        self.bindings.insert(
            var.into(),
            EnvBinding {
                key: key.into(),
                transformer: Some(Arc::new(transformer)),
            },
        );
    }

    /// Canonical key for a variable, before alias resolution, if any rule applies.
    pub fn key_for(&self, var: &str) -> Option<String> {
        if let Some(binding) = self.bindings.get(var) {
            return Some(binding.key.clone());
        }
        let prefix = self.prefix.as_deref()?;
        let rest = var.strip_prefix(prefix)?.strip_prefix(self.separator.as_str())?;
        let segments: Vec<&str> = rest
            .split(self.separator.as_str())
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.is_empty() {
            return None;
        }
        let key = (self.formatter)(segments.as_slice());
        if key.is_empty() { None } else { Some(key) }
    }

    /// Build a tree from an environment snapshot.
    ///
    /// Variables are visited in sorted name order, so overlapping auto-bound
    /// names always resolve the same way. `resolve` maps each produced key to
    /// its canonical form before assignment.
    pub fn read<I, K, V>(&self, snapshot: I, resolve: impl Fn(&str) -> String) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sorted: BTreeMap<String, String> = snapshot
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut tree = Map::new();
        for (var, raw) in &sorted {
            let Some(key) = self.key_for(var) else {
                continue;
            };
            let value = match self.bindings.get(var) {
                Some(EnvBinding {
                    transformer: Some(transform),
                    ..
                }) => transform(raw.as_str()),
                _ => coerce_str(raw),
            };
            let canonical = resolve(&key);
            debug!(var = %var, key = %canonical, "Bound environment variable");
            set_path(&mut tree, &canonical, value);
        }
        Value::Object(tree)
    }
}
